use std::fs;
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use ota_core::{
    AgentConfig, ConnectivityEvent, DirPartitions, FileTransfer, FirmwareIdentity, ImageDescriptor,
    OtaAgent, PartitionSlot, SessionHandle, SessionOutcome, SessionReport, TracingObserver,
    pack_image, reconcile_boot_state, verify_image,
};
use tracing::{info, warn};

use crate::host::HostRestart;

type HostAgent = OtaAgent<FileTransfer, DirPartitions, TracingObserver>;

struct Host {
    store: Arc<DirPartitions>,
    restart: Arc<HostRestart>,
    agent: HostAgent,
}

/// Open the partition directory and boot the agent. Boot reconciliation
/// happens before agent setup, so it runs even when setup fails.
fn open_host(config: &AgentConfig) -> Result<Host> {
    let store = Arc::new(
        DirPartitions::open(&config.partition_dir)
            .with_context(|| format!("opening partitions in {}", config.partition_dir))?,
    );
    let restart = Arc::new(HostRestart::new(Arc::clone(&store)));
    let (agent, _outcome) = OtaAgent::start(
        config,
        store.as_ref(),
        Arc::new(FileTransfer::new()),
        Arc::clone(&store),
        restart.clone(),
        Arc::new(TracingObserver),
    )?;
    Ok(Host {
        store,
        restart,
        agent,
    })
}

pub fn init(config: &AgentConfig, image: &Path) -> Result<()> {
    let data = fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    verify_image(&data).context("factory image failed verification")?;
    let identity = ImageDescriptor::from_bytes(&data)?.identity;

    let store = DirPartitions::open(&config.partition_dir)?;
    store.install_factory(&data)?;
    info!(dir = %config.partition_dir, firmware = %identity, "Factory image installed");
    Ok(())
}

pub fn pack(
    body: &Path,
    out: &Path,
    project: &str,
    version: &str,
    build_timestamp: Option<String>,
) -> Result<()> {
    let body = fs::read(body).with_context(|| format!("reading {}", body.display()))?;
    let timestamp = build_timestamp
        .unwrap_or_else(|| chrono::Local::now().format("%b %d %Y %H:%M:%S").to_string());
    let descriptor = ImageDescriptor::new(FirmwareIdentity::new(project, version, timestamp));
    let image = pack_image(&descriptor, &body)?;
    fs::write(out, &image).with_context(|| format!("writing {}", out.display()))?;
    info!(
        out = %out.display(),
        size = image.len(),
        firmware = %descriptor.identity,
        "Image packed"
    );
    Ok(())
}

pub fn status(config: &AgentConfig) -> Result<()> {
    let store = DirPartitions::open(&config.partition_dir)?;
    let record = store.record()?;
    println!("Partition dir: {}", config.partition_dir);
    for slot in [PartitionSlot::Ota0, PartitionSlot::Ota1] {
        let rec = record.slot(slot);
        let mut flags = Vec::new();
        if record.running == slot {
            flags.push("running");
        }
        if record.boot == slot {
            flags.push("boot");
        }
        let firmware = store
            .slot_identity(slot)
            .map(|id| id.to_string())
            .unwrap_or_else(|_| "<empty>".to_string());
        println!(
            "  {:<6} {:<15} attempts={} [{}] {}",
            slot.label(),
            rec.state.to_string(),
            rec.boot_attempts,
            flags.join(","),
            firmware
        );
    }
    Ok(())
}

pub fn boot(config: &AgentConfig) -> Result<()> {
    let store = DirPartitions::open(&config.partition_dir)?;
    let outcome = reconcile_boot_state(&store, &TracingObserver);
    println!("{outcome}");
    Ok(())
}

pub fn reset(config: &AgentConfig) -> Result<()> {
    let store = DirPartitions::open(&config.partition_dir)?;
    let outcome = store.simulate_reset()?;
    println!("{outcome:?}");
    Ok(())
}

pub fn notify(config: &AgentConfig, payload: &[u8]) -> Result<()> {
    let host = open_host(config)?;
    match host.agent.on_notification(payload) {
        Ok(handle) => finish(handle),
        Err(reason) => {
            println!("Rejected: {reason}");
            Ok(())
        }
    }
}

/// Boot, bring the link up, then feed `<topic> <payload>` lines to the agent
/// until input ends or a committed update restarts the device.
pub fn run_loop<R: BufRead>(config: &AgentConfig, input: R) -> Result<()> {
    let host = open_host(config)?;
    host.agent.on_connectivity(ConnectivityEvent::StationStarted);
    host.agent.on_connectivity(ConnectivityEvent::Connected);
    host.agent
        .on_connectivity(ConnectivityEvent::GotAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    let mut active: Option<SessionHandle> = None;
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((topic, payload)) = line.split_once(char::is_whitespace) else {
            warn!(line = %line, "Expected \"<topic> <payload>\"");
            continue;
        };

        if active.as_ref().is_some_and(SessionHandle::is_finished)
            && let Some(done) = active.take()
        {
            finish(done)?;
        }
        if host.restart.was_requested() {
            break;
        }

        match host.agent.on_message(topic, payload.trim().as_bytes()) {
            Ok(handle) => active = Some(handle),
            Err(reason) => println!("Rejected: {reason}"),
        }
    }

    if let Some(handle) = active {
        finish(handle)?;
    }
    if host.restart.was_requested() {
        let record = host.store.record()?;
        info!(running = %record.running, "Device restarted into new image");
    }
    Ok(())
}

fn finish(handle: SessionHandle) -> Result<()> {
    let report: SessionReport = match handle.wait() {
        Ok(report) => report,
        Err(_) => bail!("update task panicked"),
    };
    match report.outcome {
        SessionOutcome::Committed { slot } => {
            println!("Committed to {slot} ({} bytes)", report.bytes_received);
            Ok(())
        }
        SessionOutcome::Aborted => {
            println!("Aborted after {} bytes", report.bytes_received);
            Ok(())
        }
        SessionOutcome::Failed(e) => Err(e).context("update failed"),
    }
}
