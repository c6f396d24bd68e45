//! Node assembly (§10.8): the single owned `Node` record that threads
//! through every task, and the async glue connecting it to the radio,
//! the router, the reliable-send/chunker protocol, and the adapters.
//!
//! `main.rs` builds an executor on a dedicated thread and runs a single
//! top-level task owning everything reachable from it — `Node::run` is
//! that task, generalized from one simulated node to the one real node
//! this binary represents. Per §9's
//! re-architecture note, every periodic duty here is a plain `&mut self`
//! method invoked from one serialized loop rather than independently
//! spawned tasks, so the single-owner/strict-serial-order contract holds
//! by construction instead of needing a shared-state lock between tasks.

use crate::adapters::{Detector, MemoryProbe, Storage, UploadMessageType, UploadRecord, Uploader, base64_wrap_image};
use crate::address::{BROADCAST, NodeAddr};
use crate::ack;
use crate::buffers::{BufferManager, LoggedMessage};
use crate::chunker::{self, ReassemblyTable};
use crate::clock;
use crate::codec;
use crate::config::NodeConfig;
use crate::crypto::{self, KeyRing};
use crate::error::MeshError;
use crate::mid::{MessageId, MessageType};
use crate::neighbors::NeighborTable;
use crate::periodic::{self, FailureCounter, HeartbeatStatus};
use crate::radio::RadioDevice;
use crate::reliable;
use crate::router::{self, RecentlyDelivered, RouterAction};
use crate::txlock::TransmitLock;
use embassy_time::{Instant, Timer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::sync::Arc;

/// Pause before retrying a failed image transfer (§4.9).
const IMAGE_RETRY_DELAY: embassy_time::Duration = embassy_time::Duration::from_secs(20);
/// Pause after a successful image transfer, letting trailing acks drain
/// before the next one starts (§4.9).
const IMAGE_INTER_SEND_DELAY: embassy_time::Duration = embassy_time::Duration::from_secs(5);

/// A forward `perform_action` decided on but deferred rather than
/// sending inline. `send_single`/`send_blob` both drain the radio (and so
/// dispatch inbound frames, and so call `perform_action`) while they wait
/// on an ack; calling back into `send_single`/`send_blob` from inside
/// `perform_action` itself would make their `async fn` futures
/// mutually recursive, which rustc cannot size. Queuing here and flushing
/// from `run`'s top level keeps the dispatch path itself non-recursive.
enum PendingForward {
    Frame { msg_type: MessageType, creator: NodeAddr, payload: Vec<u8>, next_hop: NodeAddr },
    Image { creator: NodeAddr, bytes: Vec<u8>, next_hop: NodeAddr },
    PathAnnounce { target: NodeAddr, payload: Vec<u8> },
}

/// A fully assembled mesh node: protocol state plus the radio and
/// adapter handles it drives. Generic over the radio implementation so
/// the same core runs against `MockRadioDevice` in tests and real
/// transceiver glue in the field.
pub struct Node<R: RadioDevice> {
    my_addr: NodeAddr,
    is_command_center: bool,
    encryption_enabled: bool,

    radio: R,
    rng: StdRng,

    buffers: BufferManager,
    neighbors: NeighborTable,
    reassembly: ReassemblyTable,
    txlock: TransmitLock,
    recently_delivered: RecentlyDelivered,
    failure_counter: FailureCounter,
    keyring: Option<KeyRing>,
    pending_forwards: VecDeque<PendingForward>,

    uploader: Option<Arc<dyn Uploader>>,
    detector: Option<Arc<dyn Detector>>,
    storage: Arc<dyn Storage>,
    memory_probe: Arc<dyn MemoryProbe>,

    scan_round: u32,
    images_sent: u32,
    /// Count of `T` frames this node has originated. Always 0 today: no
    /// adapter surfaces event text the way `detector` surfaces images, so
    /// there is no call site that sends one yet. Reported in
    /// `HeartbeatStatus` regardless, so a future event source only has to
    /// increment this field to show up there.
    events_sent: u32,
}

impl<R: RadioDevice> Node<R> {
    pub fn new(
        config: &NodeConfig,
        radio: R,
        uploader: Option<Arc<dyn Uploader>>,
        detector: Option<Arc<dyn Detector>>,
        storage: Arc<dyn Storage>,
        memory_probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self, MeshError> {
        let keyring = config.build_keyring()?;
        let seed = clock::epoch_ms() ^ ((config.my_addr as u64) << 32);
        Ok(Node {
            my_addr: config.my_addr,
            is_command_center: config.is_command_center,
            encryption_enabled: config.encryption_enabled,
            radio,
            rng: StdRng::seed_from_u64(seed),
            buffers: BufferManager::new(),
            neighbors: NeighborTable::new(config.initial_path.clone(), !config.dynamic_path),
            reassembly: ReassemblyTable::new(),
            txlock: TransmitLock::new(),
            recently_delivered: RecentlyDelivered::new(),
            failure_counter: FailureCounter::new(),
            keyring,
            pending_forwards: VecDeque::new(),
            uploader,
            detector,
            storage,
            memory_probe,
            scan_round: 0,
            images_sent: 0,
            events_sent: 0,
        })
    }

    pub fn address(&self) -> NodeAddr {
        self.my_addr
    }

    pub fn neighbor_table(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Runs this node forever: drains and dispatches inbound frames,
    /// pumps the outbound image pipeline, and fires each periodic duty
    /// when its deadline arrives. One call, one mutable borrow, serial
    /// order throughout (§9).
    pub async fn run(mut self) -> ! {
        let mut next_scan = Instant::now();
        let mut next_heartbeat = Instant::now() + periodic::jittered(periodic::HEARTBEAT_INTERVAL, &mut self.rng);
        let mut next_path_announce = Instant::now();
        let mut next_sweep = Instant::now() + periodic::MEMORY_SWEEP_INTERVAL;
        let mut next_validation = Instant::now() + periodic::jittered(periodic::VALIDATION_INTERVAL, &mut self.rng);

        loop {
            self.drain_and_dispatch_all().await;
            self.flush_pending_forwards().await;
            self.try_pump_one_image().await;

            let now = Instant::now();
            if !self.is_command_center && now >= next_scan {
                self.run_scan_tick().await;
                self.scan_round = self.scan_round.saturating_add(1);
                next_scan = now + periodic::jittered(periodic::scan_interval_for_round(self.scan_round), &mut self.rng);
            }
            if !self.is_command_center && now >= next_heartbeat {
                self.run_heartbeat_tick().await;
                next_heartbeat = now + periodic::jittered(periodic::HEARTBEAT_INTERVAL, &mut self.rng);
            }
            if self.is_command_center && now >= next_path_announce {
                self.run_path_announce_tick().await;
                next_path_announce = now + periodic::jittered(periodic::HEARTBEAT_INTERVAL, &mut self.rng);
            }
            if now >= next_sweep {
                self.run_memory_sweep();
                next_sweep = now + periodic::MEMORY_SWEEP_INTERVAL;
            }
            if now >= next_validation {
                self.run_validation_tick().await;
                next_validation = now + periodic::jittered(periodic::VALIDATION_INTERVAL, &mut self.rng);
            }

            Timer::after(reliable::MIN_SLEEP).await;
        }
    }

    /// Polls the radio once; if a frame is waiting, decodes and
    /// dispatches it. Returns `true` if a frame was consumed (whether or
    /// not it parsed or routed cleanly), so callers can loop until the
    /// radio is empty.
    pub async fn drain_and_dispatch_one(&mut self) -> bool {
        let Some(frame) = self.radio.try_recv() else {
            return false;
        };
        let (mid, payload) = match codec::decode(&frame.bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("dropping malformed frame from {}: {e}", frame.from);
                return true;
            }
        };
        if mid.receiver != self.my_addr && mid.receiver != BROADCAST {
            return true;
        }

        self.buffers.recd.push(LoggedMessage {
            mid,
            payload: payload.clone(),
            at: Instant::now(),
        });

        let outcome = router::dispatch(
            mid,
            &payload,
            self.my_addr,
            self.is_command_center,
            &mut self.neighbors,
            &mut self.reassembly,
            &mut self.recently_delivered,
            Instant::now(),
        );

        if let Some((target, missing)) = outcome.ack {
            self.send_ack(target, &missing).await;
        }
        if let Some(action) = outcome.action {
            self.perform_action(mid, action).await;
        }
        true
    }

    pub async fn drain_and_dispatch_all(&mut self) {
        while self.drain_and_dispatch_one().await {}
    }

    async fn perform_action(&mut self, origin: MessageId, action: RouterAction) {
        match action {
            RouterAction::ForwardFrame { msg_type, creator, payload, next_hop } => {
                self.pending_forwards.push_back(PendingForward::Frame { msg_type, creator, payload, next_hop });
            }
            RouterAction::ForwardImage { creator, bytes, next_hop } => {
                self.pending_forwards.push_back(PendingForward::Image { creator, bytes, next_hop });
            }
            RouterAction::UploadHeartbeat { creator, payload } => {
                let plaintext = self.maybe_decrypt_rsa(&payload);
                self.upload(creator, UploadMessageType::Heartbeat, plaintext).await;
            }
            RouterAction::UploadEventText { creator, payload } => {
                let plaintext = self.maybe_decrypt_rsa(&payload);
                self.upload(creator, UploadMessageType::EventText, plaintext).await;
            }
            RouterAction::UploadImage { creator, bytes } => {
                let plaintext = self.maybe_decrypt_hybrid(&bytes);
                let wrapped = base64_wrap_image(&plaintext);
                self.upload(creator, UploadMessageType::Event, wrapped).await;
            }
            RouterAction::ReemitPath { targets, announced_path } => {
                let payload = router::encode_path(&announced_path);
                for target in targets {
                    self.pending_forwards.push_back(PendingForward::PathAnnounce { target, payload: payload.clone() });
                }
            }
            RouterAction::Drop { reason } => {
                log::debug!("dropped frame from mid {origin:?}: {reason}");
            }
        }
    }

    /// Sends every forward `perform_action` queued while draining the
    /// radio. Kept out of the dispatch path itself; see [`PendingForward`].
    async fn flush_pending_forwards(&mut self) {
        while let Some(forward) = self.pending_forwards.pop_front() {
            match forward {
                PendingForward::Frame { msg_type, creator, payload, next_hop } => {
                    let (outcome, mid) = self.send_single(msg_type, creator, next_hop, &payload).await;
                    if matches!(outcome, reliable::SendOutcome::TimedOut) {
                        log::warn!("forward of mid {mid:?} to {next_hop} timed out");
                    }
                }
                PendingForward::Image { creator, bytes, next_hop } => {
                    if let Err(e) = self.send_blob(creator, next_hop, &bytes).await {
                        log::warn!("forwarding reassembled image to {next_hop} failed: {e}");
                    }
                }
                PendingForward::PathAnnounce { target, payload } => {
                    let _ = self.send_single(MessageType::ShortestPathAnnounce, self.my_addr, target, &payload).await;
                }
            }
        }
    }

    async fn upload(&self, machine_id: NodeAddr, message_type: UploadMessageType, payload: Vec<u8>) {
        let Some(uploader) = &self.uploader else {
            log::warn!("no uploader configured at command center; dropping {message_type:?} record from {machine_id}");
            return;
        };
        let record = UploadRecord {
            machine_id,
            message_type,
            payload,
            epoch_ms: clock::epoch_ms(),
        };
        if !uploader.upload(record).await {
            log::warn!("uploader rejected a {message_type:?} record from {machine_id}");
        }
    }

    fn maybe_decrypt_rsa(&self, ciphertext: &[u8]) -> Vec<u8> {
        if !self.encryption_enabled {
            return ciphertext.to_vec();
        }
        let Some(keyring) = &self.keyring else {
            return ciphertext.to_vec();
        };
        match crypto::rsa_unwrap(keyring, ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("rsa unwrap failed ({e}); uploading ciphertext as-is");
                ciphertext.to_vec()
            }
        }
    }

    fn maybe_decrypt_hybrid(&self, envelope: &[u8]) -> Vec<u8> {
        if !self.encryption_enabled {
            return envelope.to_vec();
        }
        let Some(keyring) = &self.keyring else {
            return envelope.to_vec();
        };
        match crypto::hybrid_unwrap(keyring, envelope) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("hybrid unwrap failed ({e}); uploading envelope as-is");
                envelope.to_vec()
            }
        }
    }

    /// Implements §4.3's `send_single`: fresh MID, retry/backoff for
    /// ack-requiring types, single shot otherwise. Drains the radio
    /// during every wait so an inbound ack (or anything else) is never
    /// left stranded while this call sleeps.
    pub async fn send_single(&mut self, msg_type: MessageType, creator: NodeAddr, dest: NodeAddr, payload: &[u8]) -> (reliable::SendOutcome, MessageId) {
        let mid = MessageId::fresh(&mut self.rng, msg_type, creator, self.my_addr, dest);
        let frame = match codec::encode(mid, payload) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("failed to encode frame for mid {mid:?}: {e}");
                return (reliable::SendOutcome::TimedOut, mid);
            }
        };

        if !msg_type.needs_ack() {
            self.radio.send(dest, &frame).await;
            self.buffers.sent.push(LoggedMessage {
                mid,
                payload: payload.to_vec(),
                at: Instant::now(),
            });
            return (reliable::SendOutcome::Delivered { missing: Vec::new() }, mid);
        }

        self.buffers.unacked.push(LoggedMessage {
            mid,
            payload: payload.to_vec(),
            at: Instant::now(),
        });

        for _attempt in 0..reliable::MAX_SEND_ATTEMPTS {
            self.radio.send(dest, &frame).await;
            for poll in 0..reliable::MAX_ACK_POLLS {
                Timer::after(reliable::ack_poll_backoff(poll)).await;
                self.drain_and_dispatch_all().await;
                if let ack::AckLookup::Acked { missing } = ack::lookup_ack(&self.buffers.recd, mid) {
                    self.buffers.unacked.remove_by_mid(mid);
                    self.buffers.sent.push(LoggedMessage {
                        mid,
                        payload: payload.to_vec(),
                        at: Instant::now(),
                    });
                    return (reliable::SendOutcome::Delivered { missing }, mid);
                }
            }
        }
        (reliable::SendOutcome::TimedOut, mid)
    }

    /// Sends an ack for `target`, truncating the missing-index list if
    /// the resulting frame would exceed the wire limit (§4.4: "subsequent
    /// End retries will cover the rest").
    async fn send_ack(&mut self, target: MessageId, missing: &[u16]) {
        let mut missing = missing.to_vec();
        loop {
            let payload = ack::build_ack_payload(target, &missing);
            let mid = MessageId::fresh(&mut self.rng, MessageType::Acknowledgement, self.my_addr, self.my_addr, target.sender);
            match codec::encode(mid, &payload) {
                Ok(frame) => {
                    self.radio.send(target.sender, &frame).await;
                    self.buffers.sent.push(LoggedMessage { mid, payload, at: Instant::now() });
                    return;
                }
                Err(MeshError::FrameTooLarge { .. }) if !missing.is_empty() => {
                    missing.pop();
                }
                Err(e) => {
                    log::warn!("failed to encode ack frame for mid {target:?}: {e}");
                    return;
                }
            }
        }
    }

    /// Implements the sender side of §4.4: Begin, the full chunk burst,
    /// then End/selective-repeat rounds until the missing list is empty
    /// or the retransmit budget is exhausted.
    pub async fn send_blob(&mut self, creator: NodeAddr, dest: NodeAddr, blob: &[u8]) -> Result<(), MeshError> {
        let img_id = clock::random_tag(&mut self.rng);
        let epoch = clock::epoch_ms();
        let now = Instant::now();
        if !self.txlock.acquire(dest, img_id, now) {
            let holder = self.txlock.holder().map(|(peer, _)| peer).unwrap_or(dest);
            return Err(MeshError::SendBusy { holder, peer: dest });
        }
        let result = self.send_blob_locked(creator, dest, img_id, epoch, blob).await;
        self.txlock.release(dest, img_id);
        result
    }

    async fn send_blob_locked(&mut self, creator: NodeAddr, dest: NodeAddr, img_id: chunker::ImgId, epoch: u64, blob: &[u8]) -> Result<(), MeshError> {
        let chunks: Vec<Vec<u8>> = chunker::split_into_chunks(blob).into_iter().map(|c| c.to_vec()).collect();
        let count = chunks.len() as u16;

        let begin_payload = chunker::encode_begin_payload(img_id, epoch, count);
        let (begin_outcome, begin_mid) = self.send_single(MessageType::BeginOfChunks, creator, dest, &begin_payload).await;
        if matches!(begin_outcome, reliable::SendOutcome::TimedOut) {
            return Err(MeshError::AckTimeout { mid: begin_mid });
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let item_payload = chunker::encode_chunk_item(img_id, i as u16, chunk);
            self.send_single(MessageType::ChunkItem, creator, dest, &item_payload).await;
            Timer::after(reliable::CHUNK_SLEEP).await;
        }

        let mut rounds = 0u32;
        loop {
            let end_payload = chunker::encode_end_payload(img_id, epoch);
            let (outcome, end_mid) = self.send_single(MessageType::EndOfChunks, creator, dest, &end_payload).await;
            match outcome {
                reliable::SendOutcome::Delivered { missing } if missing.is_empty() => return Ok(()),
                reliable::SendOutcome::Delivered { missing } => {
                    rounds += 1;
                    if rounds > chunker::MAX_RETRANSMIT_ROUNDS {
                        return Err(MeshError::ChunkIncomplete { img_id, missing: missing.len() });
                    }
                    for &i in &missing {
                        if let Some(bytes) = chunks.get(i as usize) {
                            let item_payload = chunker::encode_chunk_item(img_id, i, bytes);
                            self.send_single(MessageType::ChunkItem, creator, dest, &item_payload).await;
                            Timer::after(reliable::CHUNK_SLEEP).await;
                        }
                    }
                }
                reliable::SendOutcome::TimedOut => {
                    rounds += 1;
                    if rounds > chunker::MAX_RETRANSMIT_ROUNDS {
                        return Err(MeshError::AckTimeout { mid: end_mid });
                    }
                }
            }
        }
    }

    async fn run_scan_tick(&mut self) {
        if self.txlock.is_held() {
            return;
        }
        let payload = vec![self.my_addr];
        self.send_single(MessageType::NeighborBeacon, self.my_addr, BROADCAST, &payload).await;
    }

    async fn run_heartbeat_tick(&mut self) {
        if self.txlock.is_held() {
            return;
        }
        let Some(next_hop) = self.neighbors.next_hop() else {
            log::debug!("heartbeat skipped at {}: no route to command center yet", self.my_addr);
            return;
        };
        let status = HeartbeatStatus {
            neighbor_count: self.neighbors.neighbor_count() as u16,
            path_len: self.neighbors.path_to_cc().len() as u16,
            images_sent: self.images_sent,
            events_sent: self.events_sent,
            free_memory_bytes: self.memory_probe.free_bytes(),
            gps_stale_secs: None,
        };
        let plaintext = status.to_bytes();
        // Encrypted end-to-end for the command center at the tail of the
        // path, not the link-layer next hop: a relay never decrypts, only
        // the command center ever calls `rsa_unwrap` (§4.12).
        let cc_addr = self.neighbors.path_to_cc().last().copied().unwrap_or(next_hop);
        let payload = self.maybe_encrypt_rsa(cc_addr, &plaintext);
        let (outcome, mid) = self.send_single(MessageType::Heartbeat, self.my_addr, next_hop, &payload).await;
        match outcome {
            reliable::SendOutcome::Delivered { .. } => self.failure_counter.record_success(),
            reliable::SendOutcome::TimedOut => {
                log::warn!("heartbeat mid {mid:?} to {next_hop} timed out");
                if self.failure_counter.record_failure() {
                    log::error!("radio fault after {} consecutive heartbeat failures; resetting radio", periodic::RADIO_FAULT_THRESHOLD);
                    self.radio.reset();
                    self.failure_counter.reset();
                }
            }
        }
    }

    async fn run_path_announce_tick(&mut self) {
        if self.txlock.is_held() {
            return;
        }
        let targets: Vec<NodeAddr> = self.neighbors.neighbors().copied().collect();
        let announced_path = vec![self.my_addr];
        let payload = router::encode_path(&announced_path);
        for target in targets {
            self.send_single(MessageType::ShortestPathAnnounce, self.my_addr, target, &payload).await;
        }
    }

    async fn run_validation_tick(&mut self) {
        if self.txlock.is_held() {
            return;
        }
        let targets: Vec<NodeAddr> = self.neighbors.neighbors().copied().collect();
        for target in targets {
            let (outcome, _mid) = self.send_single(MessageType::ValidateNeighbor, self.my_addr, target, &[]).await;
            if matches!(outcome, reliable::SendOutcome::TimedOut) {
                self.neighbors.evict_neighbor(target);
                if self.neighbors.path_to_cc().first() == Some(&target) {
                    self.neighbors.clear_path();
                }
                log::warn!("neighbor {target} failed validation; evicted");
            }
        }
    }

    fn run_memory_sweep(&mut self) {
        let now = Instant::now();
        self.buffers.sweep(now);
        self.reassembly.sweep(now);
        self.txlock.tick_watchdog(now);
        log::debug!(
            "memory sweep: sent={} recd={} unacked={} chunks={}",
            self.buffers.sent.len(),
            self.buffers.recd.len(),
            self.buffers.unacked.len(),
            self.reassembly.len(),
        );
    }

    async fn try_pump_one_image(&mut self) {
        let Some(detector) = self.detector.clone() else {
            return;
        };
        if self.txlock.is_held() {
            return;
        }
        let Some(record) = detector.try_next_image() else {
            return;
        };
        let Some(next_hop) = self.neighbors.next_hop() else {
            log::debug!("no route yet; requeueing image {}", record.path);
            detector.requeue(record);
            return;
        };
        let bytes = match self.storage.read_image(&record.path) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("failed to read image {}: {e}", record.path);
                return;
            }
        };
        // Same end-to-end target as the heartbeat path: the command
        // center at the tail, not the link-layer next hop.
        let cc_addr = self.neighbors.path_to_cc().last().copied().unwrap_or(next_hop);
        let wire_bytes = self.maybe_encrypt_hybrid(cc_addr, &bytes, &record.path);
        let Some(wire_bytes) = wire_bytes else {
            detector.requeue(record);
            return;
        };

        match self.send_blob(self.my_addr, next_hop, &wire_bytes).await {
            Ok(()) => {
                self.images_sent = self.images_sent.saturating_add(1);
                Timer::after(IMAGE_INTER_SEND_DELAY).await;
            }
            Err(MeshError::SendBusy { .. }) => {
                detector.requeue(record);
            }
            Err(e) => {
                log::warn!("image transfer of {} failed: {e}", record.path);
                Timer::after(IMAGE_RETRY_DELAY).await;
                detector.requeue(record);
            }
        }
    }

    fn maybe_encrypt_rsa(&self, peer: NodeAddr, plaintext: &[u8]) -> Vec<u8> {
        if !self.encryption_enabled {
            return plaintext.to_vec();
        }
        let Some(keyring) = &self.keyring else {
            return plaintext.to_vec();
        };
        match crypto::rsa_wrap(keyring, peer, plaintext) {
            Ok(ct) => ct,
            Err(MeshError::EnvelopeTooLarge { .. }) => {
                log::warn!("payload to {peer} exceeds the rsa envelope limit; sending unwrapped");
                plaintext.to_vec()
            }
            Err(e) => {
                log::warn!("rsa wrap to {peer} failed ({e}); sending unwrapped");
                plaintext.to_vec()
            }
        }
    }

    /// Returns `None` on a hard encryption failure when encryption is
    /// required but the wrap itself failed — the caller should requeue
    /// rather than transmit an image in the clear.
    fn maybe_encrypt_hybrid(&self, peer: NodeAddr, blob: &[u8], path: &str) -> Option<Vec<u8>> {
        if !self.encryption_enabled {
            return Some(blob.to_vec());
        }
        let Some(keyring) = &self.keyring else {
            return Some(blob.to_vec());
        };
        match crypto::hybrid_wrap(keyring, peer, blob) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("hybrid wrap of {path} to {peer} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::NoMemoryProbe;
    use crate::config::RsaKeyConfig;
    use crate::radio::MockRadioDevice;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn config(addr: NodeAddr, is_cc: bool, initial_path: Vec<NodeAddr>) -> NodeConfig {
        NodeConfig {
            my_addr: addr,
            is_command_center: is_cc,
            initial_path,
            dynamic_path: true,
            encryption_enabled: false,
            rsa_keys: None,
            command_centers: if is_cc { vec![addr] } else { vec![] },
            uploader_endpoint: None,
            uploader_api_key: None,
        }
    }

    struct RecordingUploader {
        records: Mutex<Vec<UploadRecord>>,
    }

    #[async_trait::async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(&self, record: UploadRecord) -> bool {
            self.records.lock().unwrap().push(record);
            true
        }
    }

    fn node(addr: NodeAddr, is_cc: bool, initial_path: Vec<NodeAddr>, uploader: Option<Arc<dyn Uploader>>) -> Node<MockRadioDevice> {
        let cfg = config(addr, is_cc, initial_path);
        let radio = MockRadioDevice::new(addr);
        Node::new(&cfg, radio, uploader, None, Arc::new(crate::adapters::FsStorage), Arc::new(NoMemoryProbe)).unwrap()
    }

    #[test]
    fn unacked_message_type_sends_once_with_no_retry_wait() {
        futures::executor::block_on(async {
            let mut a = node(1, false, vec![2], None);
            let (outcome, mid) = a.send_single(MessageType::NeighborBeacon, 1, BROADCAST, &[1]).await;
            assert_eq!(outcome, reliable::SendOutcome::Delivered { missing: vec![] });
            assert_eq!(mid.msg_type, MessageType::NeighborBeacon);
            let sent = a.radio.drain_sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, BROADCAST);
            assert!(a.buffers.unacked.is_empty(), "a beacon never enters the unacked log");
        });
    }

    #[test]
    fn beacon_dispatch_learns_neighbor_without_blocking_on_a_timer() {
        futures::executor::block_on(async {
            let mut b = node(2, true, vec![], None);
            let mid = MessageId {
                msg_type: MessageType::NeighborBeacon,
                creator: 3,
                sender: 3,
                receiver: BROADCAST,
                tag: [b'A', b'A', b'A'],
            };
            let frame = codec::encode(mid, &[3]).unwrap();
            b.radio.inject(3, frame);
            b.drain_and_dispatch_all().await;
            assert!(b.neighbors.is_neighbor(3));
            assert!(b.radio.drain_sent().is_empty(), "a beacon draws no ack");
        });
    }

    #[test]
    fn scan_beacon_is_skipped_while_transmit_lock_is_held() {
        futures::executor::block_on(async {
            let mut n = node(1, false, vec![], None);
            n.txlock.acquire(9, [b'A', b'A', b'A'], Instant::now());
            n.run_scan_tick().await;
            assert!(n.radio.drain_sent().is_empty());
        });
    }

    #[test]
    fn heartbeat_uploads_at_command_center_after_forwarding_chain() {
        futures::executor::block_on(async {
            let uploader = Arc::new(RecordingUploader { records: Mutex::new(Vec::new()) });
            let mut cc = node(9, true, vec![], Some(uploader.clone()));
            let mid = MessageId {
                msg_type: MessageType::Heartbeat,
                creator: 3,
                sender: 3,
                receiver: 9,
                tag: [b'A', b'A', b'A'],
            };
            let frame = codec::encode(mid, b"status").unwrap();
            cc.radio.inject(3, frame);
            cc.drain_and_dispatch_all().await;
            let sent = cc.radio.drain_sent();
            assert_eq!(sent.len(), 1, "expected exactly one ack frame");
            let records = uploader.records.lock().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].machine_id, 3);
        });
    }

    fn rsa_pems() -> (String, String) {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (
            private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
            public.to_public_key_pem(LineEnding::LF).unwrap(),
        )
    }

    /// A – R – CC (spec scenario 5) with encryption enabled end to end.
    /// `A` is provisioned with public keys for both `R` (the link-layer
    /// next hop) and the command center, so a wrap addressed to the wrong
    /// one produces ciphertext the command center's own private key
    /// cannot open, catching a regression where the wrap target is the
    /// next hop instead of the path's tail.
    #[test]
    fn relayed_heartbeat_is_encrypted_for_the_command_center_not_the_next_hop() {
        futures::executor::block_on(async {
            let (relay_private_pem, relay_public_pem) = rsa_pems();
            let (cc_private_pem, cc_public_pem) = rsa_pems();
            let _ = relay_private_pem; // the relay never decrypts; only its public key is provisioned to A

            let uploader = Arc::new(RecordingUploader { records: Mutex::new(Vec::new()) });

            let mut a_cfg = config(3, false, vec![5, 9]);
            a_cfg.dynamic_path = false;
            a_cfg.encryption_enabled = true;
            a_cfg.rsa_keys = Some(RsaKeyConfig {
                own_private_pem: None,
                peer_public_pems: HashMap::from([(String::from("5"), relay_public_pem), (String::from("9"), cc_public_pem)]),
            });
            let mut a = Node::new(&a_cfg, MockRadioDevice::new(3), None, None, Arc::new(crate::adapters::FsStorage), Arc::new(NoMemoryProbe)).unwrap();

            let mut r_cfg = config(5, false, vec![9]);
            r_cfg.dynamic_path = false;
            let mut r = Node::new(&r_cfg, MockRadioDevice::new(5), None, None, Arc::new(crate::adapters::FsStorage), Arc::new(NoMemoryProbe)).unwrap();

            let mut cc_cfg = config(9, true, vec![]);
            cc_cfg.encryption_enabled = true;
            cc_cfg.rsa_keys = Some(RsaKeyConfig {
                own_private_pem: Some(cc_private_pem),
                peer_public_pems: HashMap::new(),
            });
            let mut cc = Node::new(&cc_cfg, MockRadioDevice::new(9), Some(uploader.clone()), None, Arc::new(crate::adapters::FsStorage), Arc::new(NoMemoryProbe)).unwrap();

            a.run_heartbeat_tick().await;
            let a_sent = a.radio.drain_sent();
            assert_eq!(a_sent.len(), 1);
            let (dest, frame) = a_sent.into_iter().next().unwrap();
            assert_eq!(dest, 5, "the wire hop is the relay, not the command center");

            r.radio.inject(3, frame);
            r.drain_and_dispatch_all().await;
            r.flush_pending_forwards().await;
            let r_sent = r.radio.drain_sent();
            let (_, forwarded_frame) = r_sent.into_iter().find(|(dest, _)| *dest == 9).expect("relay forwards toward the command center");

            cc.radio.inject(5, forwarded_frame);
            cc.drain_and_dispatch_all().await;

            let records = uploader.records.lock().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].machine_id, 3);
            assert!(
                HeartbeatStatus::from_bytes(&records[0].payload).is_ok(),
                "the command center's own private key must decrypt what A actually wrapped"
            );
        });
    }
}
