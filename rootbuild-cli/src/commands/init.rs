//! The `rootbuild init` command.

use super::{open_session, with_finalize};
use crate::output;
use rootbuild_builder::{BuildError, BuildrootConfig};

pub fn run(config: &BuildrootConfig) -> Result<(), BuildError> {
    let mut session = open_session(config)?;
    with_finalize(&mut session, |session| session.init())?;
    output::success(&format!("buildroot '{}' is ready", config.root));
    Ok(())
}
