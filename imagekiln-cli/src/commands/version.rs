//! Version command - print version information.

use crate::error::CliError;

/// Run the version command.
pub fn run() -> Result<(), CliError> {
    println!("imagekiln version [{}]", imagekiln::VERSION);
    Ok(())
}
