//! Dependency check used by the editor extension before offering commands.

use std::process::ExitCode;

use crate::engine::{Launcher, Target};

/// Exit status for `mlterm --check`: success when the engine client is usable.
pub fn check<L: Launcher>(launcher: &L, target: &Target) -> ExitCode {
    match launcher.probe(target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}
