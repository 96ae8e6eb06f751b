use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use client_core::keys;
use ssh_core::TracingNotifier;
use tracing::error;
use tunnel_cli::{
    block_on_detached,
    cli::{Invocation, TunnelArgs, TunnelConfig},
    forwarder::{Forwarder, interrupt_signal},
    init_tracing,
};

fn main() -> ExitCode {
    let args = TunnelArgs::parse();
    let debug = args.debug;
    init_tracing(debug);
    let outcome = block_on_detached(run(args)).map_err(anyhow::Error::from).and_then(|outcome| outcome);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if debug {
                error!("{err:?}");
            } else {
                error!("{err}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: TunnelArgs) -> Result<()> {
    let config = TunnelConfig::try_from(args)?;
    let mut forwarder = Forwarder::new(TracingNotifier::shared());
    match config.invocation {
        Invocation::ShowPublicKey { identities } => {
            let home = keys::home_dir()?;
            forwarder.show_public_key(&home, &identities).await?;
        }
        Invocation::Tunnel { client, request } => {
            forwarder.run(client, &request, interrupt_signal()).await?;
        }
    }
    Ok(())
}
