// SPDX-License-Identifier: AGPL-3.0-or-later
//! SNMPv1 trap fan-out.
//!
//! Each configured receiver gets its own UDP socket held open across job
//! ticks. `send_trap` walks every receiver and records per-receiver
//! success or failure; one failed receiver never blocks the rest.
//!
//! The trap PDU is fixed: enterprise 1.3.6.1.4.1.30378.1.1, generic 6,
//! specific 1, six octet-string varbinds under 1.3.6.1.4.1.30378.2.{1..6}
//! (class, name, alert, description, severity, last-updated-time).

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{DataError, Result};

pub const CRITICAL_SEVERITY: &str = "6";
pub const MAJOR_SEVERITY: &str = "5";
pub const MINOR_SEVERITY: &str = "4";
pub const WARNING_SEVERITY: &str = "3";
pub const INDETERMINATE_SEVERITY: &str = "2";
pub const CLEAR_SEVERITY: &str = "0";

const COMMUNITY: &str = "public";
const TRAP_CLASS: &str = "HPOVComponent";
const ENTERPRISE_OID: [u32; 9] = [1, 3, 6, 1, 4, 1, 30378, 1, 1];
const GENERIC_TRAP: i64 = 6;
const SPECIFIC_TRAP: i64 = 1;

#[derive(Debug, Clone)]
pub struct SnmpConfig {
    pub agent_host: String,
    pub target_host: String,
    pub target_port: u16,
}

/// Classifier for which job a trap originated from; not on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapType {
    GrowattAlarm,
    HuaweiAlarm,
    SolarmanAlarm,
    KstarAlarm,
    PerformanceAlarm,
    SumPerformanceAlarm,
    ClearAlarm,
}

impl fmt::Display for TrapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TrapType::GrowattAlarm => "growatt_alarm",
            TrapType::HuaweiAlarm => "huawei_alarm",
            TrapType::SolarmanAlarm => "solarman_alarm",
            TrapType::KstarAlarm => "kstar_alarm",
            TrapType::PerformanceAlarm => "performance_alarm",
            TrapType::SumPerformanceAlarm => "sum_performance_alarm",
            TrapType::ClearAlarm => "clear_alarm",
        };
        f.write_str(tag)
    }
}

/// Outbound trap capability. Sends are best-effort; implementations must
/// not propagate per-receiver failures to the caller.
#[async_trait]
pub trait TrapSink: Send + Sync {
    async fn send_trap(
        &self,
        device_name: &str,
        alert_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    );
}

pub struct SnmpOrchestrator {
    clients: Vec<SnmpClient>,
    trap_type: TrapType,
}

impl SnmpOrchestrator {
    pub async fn new(trap_type: TrapType, receivers: &[SnmpConfig]) -> Result<Self> {
        let mut clients = Vec::with_capacity(receivers.len());
        for config in receivers {
            clients.push(SnmpClient::connect(config).await?);
        }

        Ok(Self { clients, trap_type })
    }

    pub fn receiver_count(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl TrapSink for SnmpOrchestrator {
    async fn send_trap(
        &self,
        device_name: &str,
        alert_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    ) {
        for client in &self.clients {
            match client
                .send_trap(device_name, alert_name, description, severity, last_update_time)
                .await
            {
                Ok(()) => info!(
                    trap_type = %self.trap_type,
                    agent_host = %client.agent_host,
                    target = %client.target,
                    device_name,
                    alert_name,
                    severity,
                    "trap sent"
                ),
                Err(err) => error!(
                    trap_type = %self.trap_type,
                    agent_host = %client.agent_host,
                    target = %client.target,
                    device_name,
                    alert_name,
                    severity,
                    %err,
                    "failed to send trap"
                ),
            }
        }
    }
}

struct SnmpClient {
    agent_host: String,
    agent_addr: Ipv4Addr,
    target: String,
    socket: UdpSocket,
    started: Instant,
}

impl SnmpClient {
    async fn connect(config: &SnmpConfig) -> Result<Self> {
        let target = format!("{}:{}", config.target_host, config.target_port);
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| DataError::SnmpError(e.to_string()))?;
        socket
            .connect(&target)
            .await
            .map_err(|e| DataError::SnmpError(format!("connect {target}: {e}")))?;

        // The agent host is a logical identity; fall back to the wildcard
        // address when it is not a dotted quad.
        let agent_addr = config
            .agent_host
            .parse()
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        Ok(Self {
            agent_host: config.agent_host.clone(),
            agent_addr,
            target,
            socket,
            started: Instant::now(),
        })
    }

    async fn send_trap(
        &self,
        device_name: &str,
        alert_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    ) -> Result<()> {
        let uptime = (self.started.elapsed().as_millis() / 10) as u32;
        let packet = encode_trap_v1(
            self.agent_addr,
            uptime,
            &[device_name, alert_name, description, severity, last_update_time],
        );
        self.socket
            .send(&packet)
            .await
            .map_err(|e| DataError::SnmpError(format!("send to {}: {e}", self.target)))?;
        Ok(())
    }
}

/// Test double that records every trap it is asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapRecord {
    pub device_name: String,
    pub alert_name: String,
    pub description: String,
    pub severity: String,
    pub last_update_time: String,
}

#[derive(Default)]
pub struct RecordingTrapSink {
    pub records: Mutex<Vec<TrapRecord>>,
}

impl RecordingTrapSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take(&self) -> Vec<TrapRecord> {
        std::mem::take(&mut *self.records.lock().await)
    }
}

#[async_trait]
impl TrapSink for RecordingTrapSink {
    async fn send_trap(
        &self,
        device_name: &str,
        alert_name: &str,
        description: &str,
        severity: &str,
        last_update_time: &str,
    ) {
        self.records.lock().await.push(TrapRecord {
            device_name: device_name.to_string(),
            alert_name: alert_name.to_string(),
            description: description.to_string(),
            severity: severity.to_string(),
            last_update_time: last_update_time.to_string(),
        });
    }
}

// ---- BER encoding -------------------------------------------------------

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_TIME_TICKS: u8 = 0x43;
const TAG_TRAP_PDU: u8 = 0xa4;

fn encode_trap_v1(agent_addr: Ipv4Addr, uptime_ticks: u32, values: &[&str; 5]) -> Vec<u8> {
    let mut varbinds = Vec::new();
    // Varbind order is fixed: class first, then the five payload strings.
    let mut bind = |index: u32, value: &str| {
        let oid = [1u32, 3, 6, 1, 4, 1, 30378, 2, index];
        let mut entry = encode_oid(&oid);
        entry.extend(encode_tlv(TAG_OCTET_STRING, value.as_bytes()));
        varbinds.extend(encode_tlv(TAG_SEQUENCE, &entry));
    };
    bind(1, TRAP_CLASS);
    for (i, value) in values.iter().enumerate() {
        bind(i as u32 + 2, value);
    }

    let mut pdu = encode_oid(&ENTERPRISE_OID);
    pdu.extend(encode_tlv(TAG_IP_ADDRESS, &agent_addr.octets()));
    pdu.extend(encode_integer(GENERIC_TRAP));
    pdu.extend(encode_integer(SPECIFIC_TRAP));
    pdu.extend(encode_unsigned(TAG_TIME_TICKS, u64::from(uptime_ticks)));
    pdu.extend(encode_tlv(TAG_SEQUENCE, &varbinds));

    let mut message = encode_integer(0); // version 1 is on-the-wire 0
    message.extend(encode_tlv(TAG_OCTET_STRING, COMMUNITY.as_bytes()));
    message.extend(encode_tlv(TAG_TRAP_PDU, &pdu));

    encode_tlv(TAG_SEQUENCE, &message)
}

fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    encode_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }

    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let cur = bytes[start];
        let next = bytes[start + 1];
        // Strip redundant leading bytes while the sign stays intact.
        if (cur == 0x00 && next & 0x80 == 0) || (cur == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    encode_tlv(TAG_INTEGER, &bytes[start..])
}

fn encode_unsigned(tag: u8, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let mut content = Vec::new();
    // Unsigned application types still need a clear sign bit.
    if bytes[first] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[first..]);
    encode_tlv(tag, &content)
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut content = vec![(oid[0] * 40 + oid[1]) as u8];
    for arc in &oid[2..] {
        content.extend(encode_base128(*arc));
    }
    encode_tlv(TAG_OID, &content)
}

fn encode_base128(value: u32) -> Vec<u8> {
    if value < 0x80 {
        return vec![value as u8];
    }

    let mut out = Vec::new();
    let mut v = value;
    while v > 0 {
        out.push((v & 0x7f) as u8);
        v >>= 7;
    }
    out.reverse();
    let last = out.len() - 1;
    for byte in &mut out[..last] {
        *byte |= 0x80;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_arcs_encode_in_base128() {
        // 30378 = 0xED * 128 + 0x2A -> 0x81 0xED 0x2A with continuation bits.
        let encoded = encode_oid(&ENTERPRISE_OID);
        assert_eq!(encoded[0], TAG_OID);
        assert_eq!(
            &encoded[2..],
            &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x81, 0xed, 0x2a, 0x01, 0x01]
        );
    }

    #[test]
    fn integers_use_minimal_encoding() {
        assert_eq!(encode_integer(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(encode_integer(6), vec![0x02, 0x01, 0x06]);
        assert_eq!(encode_integer(300), vec![0x02, 0x02, 0x01, 0x2c]);
    }

    #[test]
    fn unsigned_values_keep_sign_bit_clear() {
        assert_eq!(encode_unsigned(TAG_TIME_TICKS, 0), vec![0x43, 0x01, 0x00]);
        assert_eq!(
            encode_unsigned(TAG_TIME_TICKS, 200),
            vec![0x43, 0x02, 0x00, 0xc8]
        );
    }

    #[test]
    fn long_lengths_use_the_long_form() {
        let mut out = Vec::new();
        encode_length(&mut out, 200);
        assert_eq!(out, vec![0x81, 200]);

        let mut out = Vec::new();
        encode_length(&mut out, 1000);
        assert_eq!(out, vec![0x82, 0x03, 0xe8]);
    }

    #[test]
    fn trap_packet_carries_community_class_and_varbinds_in_order() {
        let packet = encode_trap_v1(
            Ipv4Addr::new(10, 0, 0, 5),
            0,
            &["P1", "HUW-Disconnect", "Huawei,INV-01,Disconnect", "5", "171"],
        );

        assert_eq!(packet[0], TAG_SEQUENCE);

        let needle = |s: &str| {
            packet
                .windows(s.len())
                .position(|w| w == s.as_bytes())
        };

        let community = needle(COMMUNITY).expect("community present");
        let class = needle(TRAP_CLASS).expect("class varbind present");
        let name = needle("P1").expect("name varbind present");
        let alert = needle("HUW-Disconnect").expect("alert varbind present");
        let severity = needle("5").expect("severity varbind present");
        assert!(community < class);
        assert!(class < name);
        assert!(name < alert);
        assert!(alert < severity);

        assert!(packet
            .windows(4)
            .any(|w| w == Ipv4Addr::new(10, 0, 0, 5).octets()));
    }

    #[tokio::test]
    async fn fan_out_attempts_every_receiver() {
        // Two receivers on loopback; nothing listens, but UDP sends succeed
        // and the orchestrator must attempt both without short-circuiting.
        let receivers = vec![
            SnmpConfig {
                agent_host: "10.0.0.1".to_string(),
                target_host: "127.0.0.1".to_string(),
                target_port: 16200,
            },
            SnmpConfig {
                agent_host: "10.0.0.2".to_string(),
                target_host: "127.0.0.1".to_string(),
                target_port: 16201,
            },
        ];

        let orchestrator = SnmpOrchestrator::new(TrapType::ClearAlarm, &receivers)
            .await
            .unwrap();
        assert_eq!(orchestrator.receiver_count(), 2);
        orchestrator.send_trap("P1", "A", "D", "0", "t").await;
    }
}
