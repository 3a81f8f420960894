//! The `rootbuild rebuild` command.

use super::{open_session, with_finalize};
use crate::output;
use rootbuild_builder::{BuildError, BuildrootConfig};
use std::path::Path;

pub fn run(config: &BuildrootConfig, srpm: &Path, cleanup_after: bool) -> Result<(), BuildError> {
    let mut session = open_session(config)?;
    let built = with_finalize(&mut session, |session| {
        session.init()?;
        session.rebuild(srpm)
    });
    let cleaned = if cleanup_after {
        session.clean()
    } else {
        Ok(())
    };
    let results = built?;
    cleaned?;

    for path in &results {
        output::result(path);
    }
    output::success(&format!("built {}", srpm.display()));
    Ok(())
}
