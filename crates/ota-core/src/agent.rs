//! OTA agent - top-level orchestrator.
//!
//! Owns the long-lived pieces (dispatcher, gate, link supervisor) and starts
//! one background task per admitted update session. The entry points mirror
//! the device's event sources: boot, connectivity, and message delivery.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::boot::reconcile_boot_state;
use crate::config::AgentConfig;
use crate::controller::{FetchApplyController, Restart, SessionReport};
use crate::dispatcher::UpdateDispatcher;
use crate::error::RejectReason;
use crate::events::{BootOutcome, OtaEvent, OtaObserver};
use crate::gate::UpdateGate;
use crate::identity::{FirmwareIdentity, RunningImage};
use crate::link::{
    ConnectivityEvent, Link, LinkStatus, LinkSupervisor, LocalChannel, LoopbackLink,
    MessageChannel,
};
use crate::session::{CancelFlag, UpdateOffer};
use crate::storage::PartitionStore;
use crate::transport::{BulkTransfer, TransferCredentials};

const TASK_NAME: &str = "ota_task";

/// Handle to a running update session.
pub struct SessionHandle {
    join: JoinHandle<SessionReport>,
    cancel: CancelFlag,
}

impl SessionHandle {
    /// Ask the session to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the session reaches a terminal phase.
    pub fn wait(self) -> thread::Result<SessionReport> {
        self.join.join()
    }
}

/// The update agent.
pub struct OtaAgent<T, P, O>
where
    T: BulkTransfer + 'static,
    P: PartitionStore + 'static,
    O: OtaObserver + 'static,
{
    running: FirmwareIdentity,
    dispatcher: UpdateDispatcher,
    gate: UpdateGate,
    store: Arc<P>,
    observer: Arc<O>,
    controller: FetchApplyController<T, P, O>,
    supervisor: Mutex<LinkSupervisor>,
    link: Arc<dyn Link>,
    channel: Arc<dyn MessageChannel>,
}

impl<T, P, O> OtaAgent<T, P, O>
where
    T: BulkTransfer + 'static,
    P: PartitionStore + 'static,
    O: OtaObserver + 'static,
{
    /// Boot entry point: reconcile boot state, then build the agent.
    ///
    /// Reconciliation runs before anything that can fail, so a bad trust
    /// anchor or unreadable descriptor cannot leave a new image unconfirmed.
    pub fn start(
        config: &AgentConfig,
        running_image: &dyn RunningImage,
        transfer: Arc<T>,
        store: Arc<P>,
        restart: Arc<dyn Restart>,
        observer: Arc<O>,
    ) -> Result<(Self, BootOutcome)> {
        let outcome = reconcile_boot_state(store.as_ref(), observer.as_ref());
        let agent = Self::new(config, running_image, transfer, store, restart, observer)?;
        agent.log_running_firmware();
        Ok((agent, outcome))
    }

    /// Build an agent. Reads the running image's identity and the configured
    /// trust anchor once; both are fixed for the agent's lifetime.
    pub fn new(
        config: &AgentConfig,
        running_image: &dyn RunningImage,
        transfer: Arc<T>,
        store: Arc<P>,
        restart: Arc<dyn Restart>,
        observer: Arc<O>,
    ) -> Result<Self> {
        let running = running_image
            .running_identity()
            .context("reading running image descriptor")?;
        let credentials = config.load_credentials()?;
        Ok(Self::with_credentials(
            config,
            running,
            credentials,
            transfer,
            store,
            restart,
            observer,
        ))
    }

    /// Build an agent from an already known identity and credentials.
    pub fn with_credentials(
        config: &AgentConfig,
        running: FirmwareIdentity,
        credentials: TransferCredentials,
        transfer: Arc<T>,
        store: Arc<P>,
        restart: Arc<dyn Restart>,
        observer: Arc<O>,
    ) -> Self {
        let controller = FetchApplyController::new(
            transfer,
            Arc::clone(&store),
            restart,
            Arc::clone(&observer),
            running.clone(),
            credentials,
        );
        Self {
            dispatcher: UpdateDispatcher::new(config.update_topic.clone(), running.clone()),
            running,
            gate: UpdateGate::new(),
            store,
            observer,
            controller,
            supervisor: Mutex::new(LinkSupervisor::new(
                config.update_topic.clone(),
                config.max_reconnect_attempts,
            )),
            link: Arc::new(LoopbackLink::new()),
            channel: Arc::new(LocalChannel::new()),
        }
    }

    /// Use the given link and message channel instead of the loopback pair.
    pub fn with_network(mut self, link: Arc<dyn Link>, channel: Arc<dyn MessageChannel>) -> Self {
        self.link = link;
        self.channel = channel;
        self
    }

    pub fn running_identity(&self) -> &FirmwareIdentity {
        &self.running
    }

    pub fn update_in_progress(&self) -> bool {
        self.gate.is_held()
    }

    /// First thing on boot: confirm a pending image, then log what is running.
    pub fn on_boot(&self) -> BootOutcome {
        let outcome = reconcile_boot_state(self.store.as_ref(), self.observer.as_ref());
        self.log_running_firmware();
        outcome
    }

    fn log_running_firmware(&self) {
        info!(
            project = %self.running.project_name,
            version = %self.running.version,
            built = %self.running.build_timestamp,
            "Running firmware"
        );
    }

    pub fn on_connectivity(&self, event: ConnectivityEvent) -> LinkStatus {
        match self.supervisor.lock() {
            Ok(mut supervisor) => supervisor.handle(
                event,
                self.link.as_ref(),
                self.channel.as_ref(),
                self.observer.as_ref(),
            ),
            Err(_) => {
                error!("Link supervisor poisoned");
                LinkStatus::GaveUp
            }
        }
    }

    /// Handle a delivery on any topic. Starts a session in the background if
    /// the notification is accepted.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Result<SessionHandle, RejectReason> {
        let offer = self
            .dispatcher
            .handle_message(topic, payload)
            .inspect_err(|r| self.reject(r))?;
        self.start_session(offer)
    }

    /// Handle a notification whose topic is already known to match.
    pub fn on_notification(&self, payload: &[u8]) -> Result<SessionHandle, RejectReason> {
        let offer = self
            .dispatcher
            .handle_notification(payload)
            .inspect_err(|r| self.reject(r))?;
        self.start_session(offer)
    }

    fn start_session(&self, offer: UpdateOffer) -> Result<SessionHandle, RejectReason> {
        let (session, token) = self.gate.try_admit(offer).inspect_err(|r| self.reject(r))?;
        self.observer.on_event(&OtaEvent::SessionAdmitted {
            version: session.offer.target_version.clone(),
            locator: session.offer.source_locator.clone(),
        });

        let cancel = session.cancel_flag();
        let controller = self.controller.clone();
        let join = thread::Builder::new()
            .name(TASK_NAME.into())
            .spawn(move || controller.run(session, token))
            .map_err(|e| {
                // The unspawned closure owned the token; dropping it freed the gate.
                let reason = RejectReason::TaskSpawnFailed(e.to_string());
                self.reject(&reason);
                reason
            })?;
        Ok(SessionHandle { join, cancel })
    }

    fn reject(&self, reason: &RejectReason) {
        if matches!(reason, RejectReason::UpdateAlreadyInProgress) {
            warn!("OTA update already in progress");
        }
        self.observer.on_event(&OtaEvent::NotificationRejected {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{RecordingRestart, SessionOutcome};
    use crate::events::RecordingObserver;
    use crate::image::{ImageDescriptor, pack_image};
    use crate::session::SessionPhase;
    use crate::storage::{MemoryPartitions, PartitionSlot, PartitionState, ResetOutcome};
    use crate::transport::{MockRead, MockTransfer};
    use std::net::{IpAddr, Ipv4Addr};

    const TOPIC: &str = "device/updates";
    const URL: &str = "https://fw.example.com/node-2.0.0.bin";

    fn image(version: &str) -> Vec<u8> {
        let body = vec![0x5a; 3000];
        pack_image(
            &ImageDescriptor::new(FirmwareIdentity::new("node", version, "2026-10-01")),
            &body,
        )
        .unwrap()
    }

    fn notification(version: &str) -> Vec<u8> {
        format!(r#"{{"version":"{version}","url":"{URL}"}}"#).into_bytes()
    }

    struct Device {
        transfer: Arc<MockTransfer>,
        store: Arc<MemoryPartitions>,
        restart: Arc<RecordingRestart>,
        observer: Arc<RecordingObserver>,
        agent: OtaAgent<MockTransfer, MemoryPartitions, RecordingObserver>,
    }

    fn boot(store: Arc<MemoryPartitions>, transfer: Arc<MockTransfer>) -> Device {
        let restart = Arc::new(RecordingRestart::new());
        let observer = Arc::new(RecordingObserver::new());
        let agent = OtaAgent::new(
            &AgentConfig::default(),
            store.as_ref(),
            Arc::clone(&transfer),
            Arc::clone(&store),
            restart.clone(),
            Arc::clone(&observer),
        )
        .unwrap();
        Device {
            transfer,
            store,
            restart,
            observer,
            agent,
        }
    }

    fn factory_device() -> Device {
        boot(
            Arc::new(MemoryPartitions::new(image("1.0.0"))),
            Arc::new(MockTransfer::new()),
        )
    }

    fn rejections(observer: &RecordingObserver) -> usize {
        observer
            .events()
            .iter()
            .filter(|e| matches!(e, OtaEvent::NotificationRejected { .. }))
            .count()
    }

    #[test]
    fn test_same_version_creates_no_session() {
        let dev = factory_device();
        assert_eq!(dev.agent.running_identity().version, "1.0.0");

        let err = dev
            .agent
            .on_message(TOPIC, &notification("1.0.0"))
            .err()
            .unwrap();
        assert_eq!(err, RejectReason::AlreadyCurrent("1.0.0".into()));
        assert!(!dev.agent.update_in_progress());
        assert!(dev.transfer.opened().is_empty());
        assert_eq!(rejections(&dev.observer), 1);
    }

    #[test]
    fn test_foreign_topic_and_garbage_rejected() {
        let dev = factory_device();
        assert!(matches!(
            dev.agent.on_message("other/topic", &notification("2.0.0")),
            Err(RejectReason::UnexpectedTopic(_))
        ));
        assert!(matches!(
            dev.agent.on_notification(b"{oops"),
            Err(RejectReason::MalformedMessage(_))
        ));
        assert!(dev.transfer.opened().is_empty());
        assert_eq!(rejections(&dev.observer), 2);
    }

    #[test]
    fn test_full_update_cycle() {
        let dev = factory_device();
        assert_eq!(dev.agent.on_boot(), BootOutcome::NormalBoot);

        dev.transfer.serve_image(URL, &image("2.0.0"), 512);
        let report = dev
            .agent
            .on_message(TOPIC, &notification("2.0.0"))
            .unwrap()
            .wait()
            .unwrap();
        assert!(matches!(
            report.outcome,
            SessionOutcome::Committed {
                slot: PartitionSlot::Ota1
            }
        ));
        assert_eq!(dev.restart.count(), 1);
        assert!(dev.agent.update_in_progress());

        // Bootloader switches, new firmware comes up and confirms itself.
        assert!(matches!(dev.store.reset(), ResetOutcome::Switched { .. }));
        let dev = boot(Arc::clone(&dev.store), Arc::clone(&dev.transfer));
        assert_eq!(dev.agent.running_identity().version, "2.0.0");
        assert_eq!(dev.agent.on_boot(), BootOutcome::ConfirmedUpdate);
        assert_eq!(
            dev.store.state(PartitionSlot::Ota1).unwrap(),
            PartitionState::Valid
        );
        assert!(!dev.agent.update_in_progress());

        assert_eq!(
            dev.agent.on_notification(&notification("2.0.0")).err(),
            Some(RejectReason::AlreadyCurrent("2.0.0".into()))
        );
    }

    #[test]
    fn test_start_confirms_update_despite_missing_trust_anchor() {
        let dev = factory_device();
        dev.transfer.serve_image(URL, &image("2.0.0"), 512);
        dev.agent
            .on_notification(&notification("2.0.0"))
            .unwrap()
            .wait()
            .unwrap();
        assert!(matches!(dev.store.reset(), ResetOutcome::Switched { .. }));

        let config = AgentConfig {
            trust_anchor_path: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let started = OtaAgent::start(
            &config,
            dev.store.as_ref(),
            Arc::clone(&dev.transfer),
            Arc::clone(&dev.store),
            Arc::new(RecordingRestart::new()),
            Arc::new(RecordingObserver::new()),
        );
        assert!(started.is_err());
        assert_eq!(
            dev.store.state(PartitionSlot::Ota1).unwrap(),
            PartitionState::Valid
        );
        assert_eq!(dev.store.reset(), ResetOutcome::Unchanged(PartitionSlot::Ota1));
    }

    #[test]
    fn test_start_reports_boot_outcome() {
        let store = Arc::new(MemoryPartitions::new(image("1.0.0")));
        let (agent, outcome) = OtaAgent::start(
            &AgentConfig::default(),
            store.as_ref(),
            Arc::new(MockTransfer::new()),
            Arc::clone(&store),
            Arc::new(RecordingRestart::new()),
            Arc::new(RecordingObserver::new()),
        )
        .unwrap();
        assert_eq!(outcome, BootOutcome::NormalBoot);
        assert_eq!(agent.running_identity().version, "1.0.0");
    }

    #[test]
    fn test_second_notification_while_busy() {
        let dev = factory_device();
        dev.transfer.serve_image(URL, &image("2.0.0"), 512);
        let hold = dev.transfer.hold_first_read();

        let first = dev.agent.on_notification(&notification("2.0.0")).unwrap();
        assert!(dev.agent.update_in_progress());
        assert_eq!(
            dev.agent.on_notification(&notification("2.0.1")).err(),
            Some(RejectReason::UpdateAlreadyInProgress)
        );

        hold.send(()).unwrap();
        let report = first.wait().unwrap();
        assert!(matches!(report.outcome, SessionOutcome::Committed { .. }));
        assert_eq!(dev.transfer.opened(), vec![URL.to_string()]);
    }

    #[test]
    fn test_failed_session_allows_retry() {
        let dev = factory_device();
        let img = image("2.0.0");
        dev.transfer.script(
            URL,
            Some(img.len() as u64),
            [MockRead::Data(img[..1000].to_vec()), MockRead::EndOfStream],
        );

        let report = dev
            .agent
            .on_notification(&notification("2.0.0"))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(report.phase, SessionPhase::Failed);
        assert!(!dev.agent.update_in_progress());
        assert_eq!(dev.restart.count(), 0);

        dev.transfer.serve_image(URL, &img, 512);
        let retry = dev
            .agent
            .on_notification(&notification("2.0.0"))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(retry.phase, SessionPhase::Committed);
    }

    #[test]
    fn test_cancel_aborts_session() {
        let dev = factory_device();
        dev.transfer.serve_image(URL, &image("2.0.0"), 512);
        let hold = dev.transfer.hold_first_read();

        let handle = dev.agent.on_notification(&notification("2.0.0")).unwrap();
        handle.cancel();
        // The task may still be parked before open; ignore a closed receiver.
        let _ = hold.send(());

        let report = handle.wait().unwrap();
        assert!(matches!(report.outcome, SessionOutcome::Aborted));
        assert!(!dev.agent.update_in_progress());
        assert_eq!(dev.store.record().boot, PartitionSlot::Ota0);
    }

    #[test]
    fn test_connectivity_subscribes_update_topic() {
        let dev = factory_device();
        let link = Arc::new(LoopbackLink::new());
        let channel = Arc::new(LocalChannel::new());
        let agent = dev.agent.with_network(link.clone(), channel.clone());

        assert_eq!(
            agent.on_connectivity(ConnectivityEvent::StationStarted),
            LinkStatus::Connecting
        );
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(
            agent.on_connectivity(ConnectivityEvent::GotAddress(ip)),
            LinkStatus::Online(ip)
        );
        assert_eq!(link.connects(), 1);
        assert_eq!(channel.subscriptions(), vec![TOPIC.to_string()]);
    }
}
