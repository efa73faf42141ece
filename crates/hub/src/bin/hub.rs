use clap::{CommandFactory, FromArgMatches};

use hub::common::cli::{RootOptions, SubCommand};
use hub::common::setup::setup_logging;
use hub::server::bootstrap::serve;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> hub::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Serve(opts) => serve(opts).await,
    };
    if let Err(error) = result {
        log::error!("{error}");
        std::process::exit(1);
    }
    Ok(())
}
