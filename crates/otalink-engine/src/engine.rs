//! The update state machine.
//!
//! Owns every piece of per-attempt state (`UpdateDescriptor`,
//! `TransferProgress`, `CryptoSession`, `StatusReport`) and drives the
//! lifecycle `Idle → Notified → InProgress ⇄ Stalled →
//! ReportingStatus → Idle`, with an implicit failure edge from any
//! state into `ReportingStatus`. Nothing here blocks: the surrounding
//! event loop owns timers and calls back in whenever the engine
//! returns control.

use heapless::{String, Vec};
use log::{debug, info, warn};
use zeroize::Zeroize;

use crate::auth::unpack_header;
use crate::descriptor::{
    CommandOrigin, ImageKind, MAX_PATH_LEN, ServerEndpoint, SourceLocation, UpdateDescriptor,
    parse_command, parse_location_body,
};
use crate::error::{TransferError, UpdateError};
use crate::fetch::{ChunkScheduler, DEFAULT_CHUNK_RETRIES, MAX_FETCH, TransferProgress};
use crate::pipeline::{CryptoSession, MAX_BLOCK};
use crate::ports::{
    BlockDecryptor, FlashDriver, HeaderVerifier, ImageDigest, NotifyError, SaveError, Transport,
};
use crate::report::{STATUS_SUCCESS, StatusReport, encode_status, status_code};

const SAVE_CAPACITY: usize = MAX_FETCH + MAX_BLOCK;
const STATUS_BUF_LEN: usize = 96;

/// Lifecycle discriminant. Exactly one phase is active per device; a
/// new descriptor is rejected unless the engine is `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    /// Descriptor validated, external driver informed; waiting for
    /// `start()`.
    Notified,
    InProgress,
    /// Flash driver signalled backpressure; `run` re-enters
    /// `InProgress` without losing progress.
    Stalled,
    /// Terminal code latched; waiting for the status reporter.
    ReportingStatus,
}

/// Outcome of one `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Image fully fetched, saved and verified; a success report is
    /// pending.
    Complete,
    /// Flash backpressure; call `run` again later to resume.
    Stalled,
    /// A terminal error was latched; a failure report is pending.
    Failed,
    /// The engine was not in a runnable phase.
    NotActive,
}

/// Static engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Requested chunk length; clamped to `[MIN_FETCH, MAX_FETCH]`.
    pub chunk_len: u32,
    /// Consecutive no-progress range requests before `GetFailed`.
    pub chunk_retry_limit: u8,
    /// Driver notify attempts before the update is abandoned.
    pub notify_retry_limit: u8,
    /// Status send attempts before the report is dropped.
    pub report_retry_limit: u8,
    /// Request path for outbound status messages.
    pub status_path: String<MAX_PATH_LEN>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut status_path = String::new();
        // Capacity is far above the literal; push cannot fail.
        let _ = status_path.push_str("/ota-status");
        Self {
            chunk_len: 1024,
            chunk_retry_limit: DEFAULT_CHUNK_RETRIES,
            notify_retry_limit: 3,
            report_retry_limit: 3,
            status_path,
        }
    }
}

/// The OTA update engine. Generic over the flash driver and the two
/// crypto capabilities a LAN session needs; cloud updates never touch
/// the crypto parameters.
pub struct UpdateEngine<F, D, G>
where
    F: FlashDriver,
    D: BlockDecryptor,
    G: ImageDigest,
{
    config: EngineConfig,
    scheduler: ChunkScheduler,
    flash: F,
    phase: UpdatePhase,
    descriptor: Option<UpdateDescriptor>,
    progress: TransferProgress,
    session: Option<CryptoSession<D, G>>,
    report: StatusReport,
    /// Status destination retained when a LAN command fails before its
    /// descriptor is built, so the failure report still reaches the
    /// peer.
    report_server: Option<ServerEndpoint>,
    /// Remote fetches: the endpoint discovered from the metadata body.
    resolved: Option<ServerEndpoint>,
    /// Plaintext offset of the next flash write.
    flash_offset: u32,
    /// Decrypted-but-unsaved plaintext, retained across a stall so the
    /// cipher chain never has to replay a byte range.
    pending_save: Vec<u8, SAVE_CAPACITY>,
    chunk_buf: [u8; MAX_FETCH],
    report_attempts: u8,
    /// Set while the driver has not yet accepted `notify`.
    notify_pending: bool,
}

impl<F, D, G> UpdateEngine<F, D, G>
where
    F: FlashDriver,
    D: BlockDecryptor,
    G: ImageDigest,
{
    pub fn new(flash: F, config: EngineConfig) -> Self {
        let scheduler = ChunkScheduler::new(config.chunk_len, config.chunk_retry_limit);
        Self {
            config,
            scheduler,
            flash,
            phase: UpdatePhase::Idle,
            descriptor: None,
            progress: TransferProgress::default(),
            session: None,
            report: StatusReport::default(),
            report_server: None,
            resolved: None,
            flash_offset: 0,
            pending_save: Vec::new(),
            chunk_buf: [0u8; MAX_FETCH],
            report_attempts: 0,
            notify_pending: false,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Current descriptor, if an attempt is active.
    pub fn descriptor(&self) -> Option<&UpdateDescriptor> {
        self.descriptor.as_ref()
    }

    /// Code and image kind of the latched report, if one is waiting to
    /// be sent. When the engine has no endpoint for it (a cloud
    /// command too malformed to name one), the agent reads this and
    /// emits the code itself via [`send_residual_status`].
    pub fn pending_report(&self) -> Option<(u8, ImageKind)> {
        if self.phase == UpdatePhase::ReportingStatus && self.report.pending() {
            Some((self.report.code(), self.report.kind()))
        } else {
            None
        }
    }

    /// Accept a cloud-issued update command.
    pub fn handle_cloud_command(&mut self, body: &[u8]) -> Result<(), UpdateError> {
        if self.phase != UpdatePhase::Idle {
            return Err(UpdateError::Busy);
        }
        let parsed = match parse_command(body, CommandOrigin::Cloud) {
            Ok(p) => p,
            Err(e) => {
                self.fail(UpdateError::Parse(e), ImageKind::Module);
                return Err(UpdateError::Parse(e));
            }
        };
        self.accept(parsed.descriptor, None)
    }

    /// Accept a peer-issued (LAN) update command. The base64 header
    /// must authenticate against this device's serial and public key
    /// before the descriptor is acted on.
    pub fn handle_lan_command<V: HeaderVerifier>(
        &mut self,
        body: &[u8],
        peer: &str,
        dsn: &str,
        verifier: &V,
    ) -> Result<(), UpdateError> {
        if self.phase != UpdatePhase::Idle {
            return Err(UpdateError::Busy);
        }
        let parsed = match parse_command(body, CommandOrigin::Lan { peer }) {
            Ok(p) => p,
            Err(e) => {
                self.report_server = peer_endpoint(peer);
                self.fail(UpdateError::Parse(e), ImageKind::Module);
                return Err(UpdateError::Parse(e));
            }
        };
        // The peer is known even if a later gate fails; keep its
        // endpoint so the failure report has somewhere to go.
        self.report_server = Some(parsed.descriptor.server.clone());
        let kind = parsed.descriptor.image_kind;
        let Some(head) = parsed.lan_head else {
            self.fail(UpdateError::Auth(crate::error::AuthError::HeaderSize), kind);
            return Err(UpdateError::Auth(crate::error::AuthError::HeaderSize));
        };
        let header = match unpack_header(head, dsn, verifier) {
            Ok(h) => h,
            Err(e) => {
                self.fail(UpdateError::Auth(e), kind);
                return Err(UpdateError::Auth(e));
            }
        };
        let session = CryptoSession::create(&header, dsn, parsed.descriptor.total_length);
        self.accept(parsed.descriptor, Some(session))
    }

    fn accept(
        &mut self,
        descriptor: UpdateDescriptor,
        session: Option<CryptoSession<D, G>>,
    ) -> Result<(), UpdateError> {
        info!(
            "ota: update command accepted, kind={} ver={} size={}",
            descriptor.image_kind.as_str(),
            descriptor.version.as_str(),
            descriptor.total_length
        );
        self.progress.reset();
        self.flash_offset = 0;
        self.pending_save.clear();
        self.resolved = None;
        self.report_attempts = 0;
        self.session = session;
        let desc = descriptor.clone();
        self.descriptor = Some(descriptor);
        self.phase = UpdatePhase::Notified;
        self.notify_pending = false;

        // The notify callback may re-enter the agent (e.g. to call
        // start()), so it runs against the driver alone, after the
        // engine's own bookkeeping is settled.
        match self.flash.notify(&desc) {
            Ok(()) => Ok(()),
            Err(NotifyError::Busy) => {
                self.notify_pending = true;
                self.progress.notify_retry_count = 1;
                debug!("ota: driver notify busy, will retry");
                Ok(())
            }
            Err(NotifyError::Rejected) => {
                let kind = desc.image_kind;
                self.fail(UpdateError::NotifyFailed, kind);
                Err(UpdateError::NotifyFailed)
            }
        }
    }

    /// Retry a driver notify that previously returned busy.
    pub fn renotify(&mut self) -> Result<(), UpdateError> {
        if self.phase != UpdatePhase::Notified || !self.notify_pending {
            return Err(UpdateError::WrongPhase);
        }
        let desc = self
            .descriptor
            .as_ref()
            .cloned()
            .ok_or(UpdateError::WrongPhase)?;
        match self.flash.notify(&desc) {
            Ok(()) => {
                self.notify_pending = false;
                self.progress.notify_retry_count = 0;
                Ok(())
            }
            Err(NotifyError::Busy)
                if self.progress.notify_retry_count < self.config.notify_retry_limit =>
            {
                self.progress.notify_retry_count += 1;
                Ok(())
            }
            Err(_) => {
                let kind = desc.image_kind;
                self.fail(UpdateError::NotifyFailed, kind);
                Err(UpdateError::NotifyFailed)
            }
        }
    }

    /// Begin (or re-begin) the transfer. Called by the agent once the
    /// driver is ready, typically from inside its notify handling.
    pub fn start(&mut self) -> Result<(), UpdateError> {
        if self.phase != UpdatePhase::Notified {
            return Err(UpdateError::WrongPhase);
        }
        self.progress.bytes_written = 0;
        self.progress.previous_offset = None;
        self.progress.chunk_retry_count = 0;
        self.phase = UpdatePhase::InProgress;
        info!("ota: transfer starting");
        Ok(())
    }

    /// Abort the attempt from outside (agent shutdown, operator
    /// cancel). Modeled as an error injected into the failure edge.
    pub fn cancel(&mut self) {
        match self.phase {
            UpdatePhase::Idle => {}
            UpdatePhase::InProgress | UpdatePhase::Stalled => {
                self.flash.save_done(false);
                let kind = self.image_kind();
                self.fail(UpdateError::Canceled, kind);
            }
            UpdatePhase::Notified | UpdatePhase::ReportingStatus => {
                let kind = self.image_kind();
                self.fail(UpdateError::Canceled, kind);
            }
        }
    }

    /// Drive the fetch loop until the image completes, the flash
    /// driver stalls, or a terminal error is latched.
    pub async fn run<T: Transport>(&mut self, transport: &mut T) -> RunOutcome {
        match self.phase {
            UpdatePhase::InProgress => {}
            UpdatePhase::Stalled => {
                debug!("ota: resuming after stall");
                self.phase = UpdatePhase::InProgress;
            }
            _ => return RunOutcome::NotActive,
        }
        let Some(desc) = self.descriptor.as_ref().cloned() else {
            return RunOutcome::NotActive;
        };
        let total = desc.total_length;

        loop {
            // Flush decrypted-but-unsaved plaintext before asking for
            // more; a stall must never lose it.
            if !self.pending_save.is_empty() {
                match self.flash.save(self.flash_offset, &self.pending_save) {
                    Ok(()) => {
                        self.flash_offset += self.pending_save.len() as u32;
                        self.pending_save.clear();
                    }
                    Err(SaveError::Stall) => {
                        debug!("ota: flash stalled at offset {}", self.flash_offset);
                        self.phase = UpdatePhase::Stalled;
                        return RunOutcome::Stalled;
                    }
                    Err(SaveError::Failed) => {
                        return self.fail_running(UpdateError::SaveFailed);
                    }
                }
            }

            let range = match self.scheduler.next_range(&mut self.progress, total) {
                Ok(r) => r,
                Err(e) => {
                    warn!("ota: fetch retries exhausted at offset {}", self.progress.bytes_written);
                    return self.fail_running(UpdateError::Transfer(e));
                }
            };
            let Some((offset, count)) = range else {
                if let Some(session) = &self.session {
                    if !session.verified() {
                        return self.fail_running(UpdateError::Transfer(
                            TransferError::ImageCorrupt,
                        ));
                    }
                }
                info!("ota: image complete, {} bytes written", self.flash_offset);
                self.flash.save_done(true);
                self.report.latch(STATUS_SUCCESS, desc.image_kind);
                self.phase = UpdatePhase::ReportingStatus;
                return RunOutcome::Complete;
            };

            // Remote images: the first response is a metadata body
            // naming the real host, not image bytes.
            if desc.source_location == SourceLocation::Remote && !self.progress.url_resolved {
                match transport
                    .fetch_range(&desc.server, 0, count, &mut self.chunk_buf)
                    .await
                {
                    Ok(n) if n > 0 => match parse_location_body(&self.chunk_buf[..n]) {
                        Ok(endpoint) => {
                            info!("ota: image url resolved to {}", endpoint.host.as_str());
                            self.resolved = Some(endpoint);
                            self.progress.url_resolved = true;
                            // The metadata round was not an image
                            // range request; it must not count as a
                            // stalled one.
                            self.progress.previous_offset = None;
                            self.progress.chunk_retry_count = 0;
                        }
                        Err(_) => warn!("ota: bad image location body"),
                    },
                    _ => {}
                }
                continue;
            }

            let server = self.resolved.as_ref().unwrap_or(&desc.server);
            let got = transport
                .fetch_range(server, offset, count, &mut self.chunk_buf)
                .await;
            let n = match got {
                Ok(n) if n > 0 => n.min(count as usize),
                Ok(_) => continue,
                Err(e) => {
                    warn!("ota: chunk fetch failed at {}: {:?}", offset, e);
                    continue;
                }
            };

            match self.session.as_mut() {
                Some(session) => {
                    let old_trim = session.padding_trim();
                    match session.feed(&self.chunk_buf[..n]) {
                        Ok(plain) => {
                            if self.pending_save.extend_from_slice(plain).is_err() {
                                return self.fail_running(UpdateError::Transfer(
                                    TransferError::GetFailed,
                                ));
                            }
                        }
                        Err(e) => {
                            return self.fail_running(UpdateError::Transfer(e));
                        }
                    }
                    let trim = session.padding_trim();
                    self.progress.padding_trim = trim;
                    // Add before subtracting: a short final read may
                    // deliver fewer bytes than the padding it reveals.
                    self.progress.bytes_written =
                        (self.progress.bytes_written + n as u32) - (trim - old_trim);
                }
                None => {
                    if self
                        .pending_save
                        .extend_from_slice(&self.chunk_buf[..n])
                        .is_err()
                    {
                        return self
                            .fail_running(UpdateError::Transfer(TransferError::GetFailed));
                    }
                    self.progress.bytes_written += n as u32;
                }
            }
            debug!(
                "ota: {}/{} bytes received",
                self.progress.bytes_written + self.progress.padding_trim,
                total
            );
        }
    }

    /// Emit the latched status report. Returns `true` once the attempt
    /// is finished and the engine is back in `Idle` (either the report
    /// was confirmed or its retry budget ran out); `false` means the
    /// caller should retry later.
    pub async fn report_status<T: Transport>(&mut self, transport: &mut T) -> bool {
        if self.phase != UpdatePhase::ReportingStatus || !self.report.pending() {
            return self.phase == UpdatePhase::Idle;
        }
        let mut buf = [0u8; STATUS_BUF_LEN];
        let Some(len) = self.report.encode(&mut buf) else {
            warn!("ota: status encode failed, dropping report");
            self.teardown();
            return true;
        };
        let server = self
            .descriptor
            .as_ref()
            .map(|d| d.server.clone())
            .or_else(|| self.report_server.clone());
        let Some(server) = server else {
            // No endpoint to reach: the agent is expected to have
            // routed this code through `send_residual_status` first.
            self.teardown();
            return true;
        };
        match transport
            .send_status(&server, self.config.status_path.as_str(), &buf[..len])
            .await
        {
            Ok(()) => {
                info!("ota: status {} reported", self.report.code());
                self.flash.status_clear();
                self.teardown();
                true
            }
            Err(e) => {
                self.report_attempts += 1;
                warn!("ota: status send failed ({:?}), attempt {}", e, self.report_attempts);
                if self.report_attempts > self.config.report_retry_limit {
                    warn!("ota: status retry budget exhausted, dropping report");
                    self.teardown();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn image_kind(&self) -> ImageKind {
        self.descriptor
            .as_ref()
            .map(|d| d.image_kind)
            .unwrap_or_default()
    }

    /// Failure edge while the fetch loop is active.
    fn fail_running(&mut self, err: UpdateError) -> RunOutcome {
        self.flash.save_done(false);
        let kind = self.image_kind();
        self.fail(err, kind);
        RunOutcome::Failed
    }

    /// Latch a terminal error (first cause wins) and move to
    /// `ReportingStatus`.
    fn fail(&mut self, err: UpdateError, kind: ImageKind) {
        warn!("ota: update failed: {}", err);
        self.report.latch(status_code(&err), kind);
        self.phase = UpdatePhase::ReportingStatus;
    }

    /// Tear down all per-attempt state. The crypto session is zeroized
    /// by its drop impl.
    fn teardown(&mut self) {
        self.session = None;
        self.descriptor = None;
        self.report_server = None;
        self.resolved = None;
        self.progress.reset();
        self.pending_save.as_mut_slice().zeroize();
        self.pending_save.clear();
        self.flash_offset = 0;
        self.report.clear();
        self.report_attempts = 0;
        self.notify_pending = false;
        self.phase = UpdatePhase::Idle;
    }
}

/// Best-effort status endpoint for a LAN command that failed before
/// its descriptor was built: the peer, on the default port.
fn peer_endpoint(peer: &str) -> Option<ServerEndpoint> {
    Some(ServerEndpoint {
        host: String::try_from(peer).ok()?,
        port: 80,
        tls: false,
        path: String::try_from("/").ok()?,
    })
}

/// Emit an out-of-band failure code that is not tied to an in-progress
/// transfer (e.g. a previous attempt's residual failure), with
/// `ota-status` semantics.
pub async fn send_residual_status<T: Transport>(
    transport: &mut T,
    server: &ServerEndpoint,
    path: &str,
    code: u8,
    kind: ImageKind,
) -> Result<(), T::Error> {
    let mut buf = [0u8; STATUS_BUF_LEN];
    let Some(len) = encode_status(code, kind, &mut buf) else {
        return Ok(());
    };
    transport.send_status(server, path, &buf[..len]).await
}
