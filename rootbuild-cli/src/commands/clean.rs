//! The `rootbuild clean` command.

use super::open_session;
use crate::output;
use rootbuild_builder::{BuildError, BuildrootConfig};

pub fn run(config: &BuildrootConfig) -> Result<(), BuildError> {
    open_session(config)?.clean()?;
    output::success(&format!("buildroot '{}' removed", config.root));
    Ok(())
}
