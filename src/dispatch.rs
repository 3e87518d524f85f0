use std::collections::HashMap;
use std::fmt;

use log::{debug, error, warn};
use mac_address::MacAddress;

use crate::decode;
use crate::messages::{RelayMessage, TagDetection};
use crate::normalize::NormalizedReading;
use crate::reconcile::Reconciler;
use crate::registry::{self, Registry};
use crate::sink::StateSink;

/// Process-lifetime counters over inbound detections. Observability only,
/// never consulted for control flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub duplicate_frames: u64,
    pub wrong_length: u64,
    pub missing_device: u64,
    pub payload_errors: u64,
    pub unrecognized: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dups={} wrong_len={} missing={} payload_errors={} unrecognized={}",
            self.duplicate_frames,
            self.wrong_length,
            self.missing_device,
            self.payload_errors,
            self.unrecognized
        )
    }
}

/// Drives one relay message through registry lookup, decode, normalization
/// and reconciliation for every detection it contains.
///
/// Owns all mutable pipeline state: reconciler states, per-device duplicate
/// tracking and the counters. Updated from a single dispatch path only.
pub struct Dispatcher<S> {
    registry: Registry,
    reconciler: Reconciler,
    last_frames: HashMap<MacAddress, u8>,
    stats: Stats,
    sink: S,
}

impl<S: StateSink> Dispatcher<S> {
    pub fn new(registry: Registry, sink: S) -> Self {
        Dispatcher {
            registry,
            reconciler: Reconciler::new(),
            last_frames: HashMap::new(),
            stats: Stats::default(),
            sink,
        }
    }

    /// Handle one inbound relay message. Never fails: malformed bodies and
    /// bad detections are counted and logged, and one bad detection never
    /// keeps the rest of the batch from being processed.
    pub async fn handle_message(&mut self, payload: &[u8]) {
        let message: RelayMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("payload not valid JSON: {err}");
                self.stats.payload_errors += 1;
                return;
            }
        };

        for location in &message.locs {
            for detection in &location.tags {
                self.handle_detection(detection).await;
            }
        }
        debug!("stats: {}", self.stats);
    }

    async fn handle_detection(&mut self, detection: &TagDetection) {
        let Some(mac) = registry::parse_address(&detection.id) else {
            warn!("unparseable tag address {:?}", detection.id);
            self.stats.payload_errors += 1;
            return;
        };

        if detection.ed.ad.len() < decode::MIN_ADVERTISEMENT_HEX {
            debug!("short advertisement from {mac}, skipping");
            self.stats.wrong_length += 1;
            return;
        }

        let Some(device) = self.registry.lookup(&mac) else {
            debug!("MAC skipped {mac}");
            self.stats.missing_device += 1;
            return;
        };

        let Some(data) = decode::parse_hex(&detection.ed.ad) else {
            warn!("advertisement from {mac} is not valid hex");
            self.stats.payload_errors += 1;
            return;
        };

        debug!("raw BLE PDU received {}", detection.ed.ad);
        let measurement = match decode::decode(device.variant, &data, mac, detection.rssi) {
            Ok(measurement) => measurement,
            Err(err) => {
                debug!("dropping advertisement from {mac}: {err}");
                self.stats.unrecognized += 1;
                return;
            }
        };

        // Relays rebroadcast the same advertisement; the vendor frame
        // counter identifies reruns.
        if let Some(counter) = measurement.frame_counter {
            if self.last_frames.get(&measurement.mac) == Some(&counter) {
                debug!("duplicate frame {counter} from {}", measurement.mac);
                self.stats.duplicate_frames += 1;
                return;
            }
            self.last_frames.insert(measurement.mac, counter);
        }

        let reading = NormalizedReading::from(&measurement);
        let updates = self.reconciler.reconcile(device, &reading, measurement.rssi);
        for update in updates {
            let entity_id = update.entity_id.clone();
            if let Err(err) = self.sink.set_state(update).await {
                error!("failed to write state for {entity_id}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::decode::DecoderVariant;
    use crate::messages::EntityUpdate;
    use serde_json::json;

    /// Sink that records every update instead of publishing it.
    #[derive(Debug, Default)]
    struct RecordingSink {
        updates: Vec<EntityUpdate>,
    }

    impl StateSink for RecordingSink {
        async fn set_state(&mut self, update: EntityUpdate) -> anyhow::Result<()> {
            self.updates.push(update);
            Ok(())
        }
    }

    const FRIDGE: [u8; 6] = [0xA4, 0xC1, 0x38, 0xDE, 0x90, 0xCE];

    fn dispatcher() -> Dispatcher<RecordingSink> {
        let configs = [DeviceConfig {
            address: MacAddress::new(FRIDGE),
            name: "Fridge".to_string(),
            variant: DecoderVariant::Xiaomi,
        }];
        let registry = Registry::build(&configs).unwrap();
        Dispatcher::new(registry, RecordingSink::default())
    }

    fn hex(data: &[u8]) -> String {
        data.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Advertisement with flags plus one Xiaomi service structure.
    fn advertisement(address: [u8; 6], frame_counter: u8, sub_type: u8, value: &[u8]) -> Vec<u8> {
        let mut body = vec![frame_counter];
        let mut reversed = address;
        reversed.reverse();
        body.extend_from_slice(&reversed);
        body.push(sub_type);
        body.extend_from_slice(value);

        let mut out = vec![0x02, 0x01, 0x06];
        out.push((3 + body.len()) as u8);
        out.extend([0x16, 0x95, 0xfe]);
        out.extend(body);
        out
    }

    fn temperature_adv(address: [u8; 6], frame_counter: u8, tenths: i16) -> Vec<u8> {
        advertisement(address, frame_counter, 0x04, &tenths.to_le_bytes())
    }

    fn humidity_adv(address: [u8; 6], frame_counter: u8, percent: u8) -> Vec<u8> {
        advertisement(address, frame_counter, 0x06, &[percent])
    }

    fn message(detections: &[(&str, i16, String)]) -> Vec<u8> {
        let tags: Vec<_> = detections
            .iter()
            .map(|(id, rssi, ad)| json!({"id": id, "rssi": rssi, "ed": {"ad": ad}}))
            .collect();
        serde_json::to_vec(&json!({"locs": [{"tags": tags}]})).unwrap()
    }

    #[tokio::test]
    async fn unknown_sender_produces_no_updates() {
        let mut dispatcher = dispatcher();
        let adv = temperature_adv([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], 1, 215);
        let body = message(&[("11:22:33:44:55:66", -60, hex(&adv))]);

        dispatcher.handle_message(&body).await;

        assert!(dispatcher.sink.updates.is_empty());
        assert_eq!(dispatcher.stats.missing_device, 1);
    }

    #[tokio::test]
    async fn first_reading_attributed_then_bare() {
        let mut dispatcher = dispatcher();

        let body = message(&[("a4:c1:38:de:90:ce", -60, hex(&temperature_adv(FRIDGE, 1, 215)))]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.sink.updates.len(), 1);
        let update = &dispatcher.sink.updates[0];
        assert_eq!(update.entity_id, "sensor.ble_fridge_temperature");
        assert_eq!(update.value, 21.5);
        assert!(update.attributes.is_some());

        // Follow-up with humidity only: one bare humidity update, no
        // temperature update.
        let body = message(&[("a4:c1:38:de:90:ce", -58, hex(&humidity_adv(FRIDGE, 2, 61)))]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.sink.updates.len(), 2);
        let update = &dispatcher.sink.updates[1];
        assert_eq!(update.entity_id, "sensor.ble_fridge_humidity");
        assert_eq!(update.value, 61.0);
        assert!(update.attributes.is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_counted_not_fatal() {
        let mut dispatcher = dispatcher();

        dispatcher.handle_message(b"not json").await;
        dispatcher.handle_message(br#"{"locs": "wrong shape"}"#).await;

        assert_eq!(dispatcher.stats.payload_errors, 2);
        assert!(dispatcher.sink.updates.is_empty());
    }

    #[tokio::test]
    async fn short_payload_never_reaches_the_decoder() {
        let mut dispatcher = dispatcher();

        // 25 hex chars, one below the minimum.
        let body = message(&[("a4:c1:38:de:90:ce", -60, "0".repeat(25))]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.stats.wrong_length, 1);
        assert_eq!(dispatcher.stats.unrecognized, 0);
        assert!(dispatcher.sink.updates.is_empty());
    }

    #[tokio::test]
    async fn bad_detection_does_not_block_the_batch() {
        let mut dispatcher = dispatcher();

        // First detection truncated mid-structure, second valid.
        let mut truncated = temperature_adv(FRIDGE, 1, 215);
        truncated.push(0x1f);
        let body = message(&[
            ("a4:c1:38:de:90:ce", -60, hex(&truncated)),
            ("a4:c1:38:de:90:ce", -60, hex(&temperature_adv(FRIDGE, 2, 215))),
        ]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.stats.unrecognized, 1);
        assert_eq!(dispatcher.sink.updates.len(), 1);
        assert_eq!(dispatcher.sink.updates[0].value, 21.5);
    }

    #[tokio::test]
    async fn repeated_frame_counter_is_dropped() {
        let mut dispatcher = dispatcher();

        let adv = hex(&temperature_adv(FRIDGE, 7, 215));
        let body = message(&[
            ("a4:c1:38:de:90:ce", -60, adv.clone()),
            ("a4:c1:38:de:90:ce", -61, adv),
        ]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.sink.updates.len(), 1);
        assert_eq!(dispatcher.stats.duplicate_frames, 1);

        // A new frame counter goes through again.
        let body = message(&[("a4:c1:38:de:90:ce", -60, hex(&temperature_adv(FRIDGE, 8, 220)))]);
        dispatcher.handle_message(&body).await;
        assert_eq!(dispatcher.sink.updates.len(), 2);
        assert_eq!(dispatcher.sink.updates[1].value, 22.0);
    }

    #[tokio::test]
    async fn sender_address_is_parsed_case_insensitively() {
        let mut dispatcher = dispatcher();

        let body = message(&[("A4:C1:38:DE:90:CE", -60, hex(&temperature_adv(FRIDGE, 1, 215)))]);
        dispatcher.handle_message(&body).await;

        assert_eq!(dispatcher.sink.updates.len(), 1);
    }

    #[tokio::test]
    async fn empty_measurement_produces_no_updates() {
        let mut dispatcher = dispatcher();

        // Valid vendor frame with a sub-type we do not track.
        let adv = advertisement(FRIDGE, 1, 0x55, &[0x00]);
        let body = message(&[("a4:c1:38:de:90:ce", -60, hex(&adv))]);
        dispatcher.handle_message(&body).await;

        assert!(dispatcher.sink.updates.is_empty());
        // Not an error either.
        assert_eq!(dispatcher.stats.unrecognized, 0);
    }
}
