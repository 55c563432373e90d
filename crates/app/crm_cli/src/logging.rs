pub mod formats;

use flexi_logger::Logger;

use crate::Error;

/// sqlx statement logging stays at warn unless `--verbose`.
const QUIET: &str = "info, sqlx=warn";
const VERBOSE: &str = "debug, sqlx=debug";

pub fn init(verbose: bool) -> Result<(), Error> {
    Logger::try_with_env_or_str(if verbose { VERBOSE } else { QUIET })?
        .format(formats::cli_format)
        .log_to_stdout()
        .start()?;

    Ok(())
}
