use lightning_rescue::{RecoveryError, RecoveryErrorKind};
use log::*;
use rescue_cli::commands;
use rescue_cli::config::{parse_args_and_config, APP_NAME};
use rescue_util::util::{abort_on_panic, setup_logging};
use std::process::exit;

fn hint(e: &anyhow::Error) -> Option<&'static str> {
    let e = e.downcast_ref::<RecoveryError>()?;
    match e.kind {
        RecoveryErrorKind::ExhaustedChain(_) => {
            Some("lower --max-num-chan-updates, the chain has fewer states")
        }
        RecoveryErrorKind::NotFound(_) => Some(
            "raise --max-num-channels-total, --max-num-chan-updates or --max-csv-limit, \
             or check the network and root key",
        ),
        RecoveryErrorKind::InsufficientValue(..) => Some("lower --fee-rate"),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    let cli = parse_args_and_config();
    if let Err(e) = setup_logging(APP_NAME, &cli.log_level, cli.log_file.as_deref()) {
        eprintln!("error: logging: {}", e);
        exit(1);
    }
    abort_on_panic();
    info!("{} {} on {}", APP_NAME, rescue_util::GIT_DESC, cli.network);

    if let Err(e) = commands::run(cli).await {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        if let Some(hint) = hint(&e) {
            eprintln!("hint: {}", hint);
        }
        exit(1);
    }
}
