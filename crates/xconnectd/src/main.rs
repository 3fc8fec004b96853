//! xconnectd entry point.
//!
//! Thin daemon around the library: loads a declarative JSON configuration
//! of policies and attachments, applies it through the control surface, and
//! optionally dumps the resulting state.

use anyhow::Context;
use clap::Parser;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use xc_types::{IfIndex, MacAddress};
use xconnectd::{
    dispatch, AttachRecord, ControlRequest, ControlResponse, FeatureControl, Policy, PolicyId,
    Priority, SwitchInterfaceTable, TableAclEngine, TrafficClass, XconnectContext, VERSION_MAJOR,
    VERSION_MINOR,
};

/// ACL-driven L2/L3 cross-connect daemon
#[derive(Parser, Debug)]
#[command(name = "xconnectd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Print the applied policies and attachments as JSON
    #[arg(short = 'd', long)]
    dump: bool,
}

/// Declarative daemon configuration.
#[derive(Debug, Deserialize)]
struct Config {
    /// Interfaces known to the daemon's interface table.
    #[serde(default)]
    interfaces: Vec<IfIndex>,
    #[serde(default)]
    policies: Vec<PolicyConfig>,
    #[serde(default)]
    attachments: Vec<AttachConfig>,
}

#[derive(Debug, Deserialize)]
struct PolicyConfig {
    id: PolicyId,
    acl: u32,
    tx_if: IfIndex,
    #[serde(default)]
    dst_mac: Option<MacAddress>,
}

#[derive(Debug, Deserialize)]
struct AttachConfig {
    policy_id: PolicyId,
    rx_if: IfIndex,
    priority: Priority,
}

#[derive(Debug, Serialize)]
struct Dump {
    policies: Vec<Policy>,
    attachments: Vec<AttachRecord>,
}

/// Feature control that only logs; the daemon carries no packet runtime.
struct LoggingFeatureControl;

impl FeatureControl for LoggingFeatureControl {
    fn enable(&self, rx_if: IfIndex, class: TrafficClass) {
        debug!("feature enabled on interface {} for {:?}", rx_if, class);
    }

    fn disable(&self, rx_if: IfIndex, class: TrafficClass) {
        debug!("feature disabled on interface {} for {:?}", rx_if, class);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("====================================================================");
    info!("Starting xconnectd v{}.{}", VERSION_MAJOR, VERSION_MINOR);
    info!("====================================================================");
    match &args.config {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: none (empty state)"),
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let interfaces = Arc::new(SwitchInterfaceTable::new());
    let mut ctx = XconnectContext::new(
        Arc::new(TableAclEngine::new()),
        Arc::new(LoggingFeatureControl),
        interfaces.clone(),
    );

    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        apply(&mut ctx, &interfaces, config)?;
    }

    if args.dump {
        print_dump(&mut ctx)?;
    }

    Ok(())
}

fn apply(
    ctx: &mut XconnectContext,
    interfaces: &SwitchInterfaceTable,
    config: Config,
) -> anyhow::Result<()> {
    for if_index in &config.interfaces {
        interfaces.add(*if_index);
    }
    info!("Interfaces: {}", config.interfaces.len());

    let mut rejected = 0usize;

    for policy in config.policies {
        let req = ControlRequest::PolicyUpsert {
            id: policy.id,
            acl: policy.acl,
            tx_if: policy.tx_if,
            dst_mac: policy.dst_mac,
        };
        if let Err(err) = dispatch(ctx, req) {
            error!("policy {}: {}", policy.id, err);
            rejected += 1;
        }
    }
    info!("Policies: {}", ctx.policies.len());

    for attach in config.attachments {
        let req = ControlRequest::Attach {
            policy_id: attach.policy_id,
            rx_if: attach.rx_if,
            priority: attach.priority,
        };
        if let Err(err) = dispatch(ctx, req) {
            error!(
                "attach {}/{}: {}",
                attach.policy_id, attach.rx_if, err
            );
            rejected += 1;
        }
    }
    info!("Attachments: {}", ctx.attachments.len());

    if rejected > 0 {
        anyhow::bail!("{} configuration entries rejected", rejected);
    }
    Ok(())
}

fn print_dump(ctx: &mut XconnectContext) -> anyhow::Result<()> {
    let policies = match dispatch(ctx, ControlRequest::PolicyDump)? {
        ControlResponse::Policies(policies) => policies,
        _ => Vec::new(),
    };
    let attachments = match dispatch(ctx, ControlRequest::AttachDump { rx_if: None })? {
        ControlResponse::Attachments(attachments) => attachments,
        _ => Vec::new(),
    };

    let dump = Dump {
        policies,
        attachments,
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
