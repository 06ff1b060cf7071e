//! Packet decoding
//!
//! Maps a validated frame's code and payload to a typed packet. Payload
//! layouts are fixed per code; values the monitor uses as "no sensor"
//! sentinels are classified as [`Reading::Invalid`].

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Frame, ProtocolError};
use crate::vitals::Reading;

/// Number of ECG leads in a 0x01 payload
pub const ECG_LEADS: usize = 7;

/// Samples per lead in a 0x01 payload
pub const SAMPLES_PER_LEAD: usize = 8;

const ECG_PAYLOAD_LEN: usize = ECG_LEADS * SAMPLES_PER_LEAD + 1;
const RESP_RATE_PAYLOAD_LEN: usize = 6;
const OXIMETRY_PAYLOAD_LEN: usize = 6;

/// Packet codes the monitor sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketCode {
    /// ECG lead samples
    Ecg,
    /// Respiration waveform sample
    RespWaveform,
    /// Respiration rate
    RespRate,
    /// SpO2, pulse rate and pleth sample
    Oximetry,
}

impl PacketCode {
    /// Look up a packet code; unknown codes return `None`
    pub fn from_byte(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PacketCode::Ecg),
            0x03 => Some(PacketCode::RespWaveform),
            0x04 => Some(PacketCode::RespRate),
            0x15 => Some(PacketCode::Oximetry),
            _ => None,
        }
    }

    /// Wire value of this code
    pub fn byte(&self) -> u8 {
        match self {
            PacketCode::Ecg => 0x01,
            PacketCode::RespWaveform => 0x03,
            PacketCode::RespRate => 0x04,
            PacketCode::Oximetry => 0x15,
        }
    }

    /// Minimum payload length needed to decode this code
    pub fn min_payload(&self) -> usize {
        match self {
            PacketCode::Ecg => ECG_PAYLOAD_LEN,
            PacketCode::RespWaveform => 1,
            PacketCode::RespRate => RESP_RATE_PAYLOAD_LEN,
            PacketCode::Oximetry => OXIMETRY_PAYLOAD_LEN,
        }
    }
}

/// ECG leads in payload order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lead {
    /// Limb lead I
    I,
    /// Limb lead II
    II,
    /// Limb lead III
    III,
    /// Chest lead
    V,
    /// Augmented right arm
    Avr,
    /// Augmented left foot
    Avf,
    /// Augmented left arm
    Avl,
}

impl Lead {
    /// All leads in payload order
    pub const ALL: [Lead; ECG_LEADS] = [
        Lead::I,
        Lead::II,
        Lead::III,
        Lead::V,
        Lead::Avr,
        Lead::Avf,
        Lead::Avl,
    ];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Lead::I => "Lead I",
            Lead::II => "Lead II",
            Lead::III => "Lead III",
            Lead::V => "Lead V",
            Lead::Avr => "Lead aVR",
            Lead::Avf => "Lead aVF",
            Lead::Avl => "Lead aVL",
        }
    }
}

impl fmt::Display for Lead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One 0x01 packet: eight samples for each of seven leads plus a flag byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcgFrame {
    leads: [[u8; SAMPLES_PER_LEAD]; ECG_LEADS],
    flag: u8,
}

impl EcgFrame {
    fn parse(payload: &[u8]) -> Self {
        let mut leads = [[0u8; SAMPLES_PER_LEAD]; ECG_LEADS];
        for (lead, chunk) in leads
            .iter_mut()
            .zip(payload.chunks_exact(SAMPLES_PER_LEAD))
        {
            lead.copy_from_slice(chunk);
        }
        Self {
            leads,
            flag: payload[ECG_LEADS * SAMPLES_PER_LEAD],
        }
    }

    /// Samples of one lead, oldest first
    pub fn lead(&self, lead: Lead) -> &[u8; SAMPLES_PER_LEAD] {
        &self.leads[lead as usize]
    }

    /// Most recent lead I sample, the one shown live
    pub fn live_sample(&self) -> u8 {
        self.leads[0][SAMPLES_PER_LEAD - 1]
    }

    /// Trailing status flag byte
    pub fn flag(&self) -> u8 {
        self.flag
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// ECG samples (0x01)
    Ecg(EcgFrame),
    /// Respiration waveform sample (0x03)
    RespWaveform(u8),
    /// Respiration rate (0x04)
    RespRate(Reading<u8>),
    /// Pulse oximetry (0x15)
    Oximetry {
        /// Plethysmographic waveform sample
        pleth: u8,
        /// Oxygen saturation
        spo2: Reading<u8>,
        /// Pulse rate
        pulse: Reading<u16>,
    },
}

/// Respiration rate is valid for 5..=80 breaths per minute
pub fn classify_resp_rate(raw: u8) -> Reading<u8> {
    Reading::checked(raw, |v| v != 0 && v != 0xFF && (5..=80).contains(&v))
}

/// SpO2 is invalid when it carries the 0x7F sentinel or exceeds 100 %
pub fn classify_spo2(raw: u8) -> Reading<u8> {
    Reading::checked(raw, |v| v != 0x7F && v <= 100)
}

/// Pulse is invalid at 0, 0xFFFF, or anything above 240 bpm
pub fn classify_pulse(raw: u16) -> Reading<u16> {
    Reading::checked(raw, |v| v != 0 && v != 0xFFFF && v <= 240)
}

/// Decode a validated frame
///
/// Returns `Ok(None)` for codes this decoder does not handle, and
/// [`ProtocolError::FrameTooShort`] when the payload cannot hold the
/// layout its code requires.
pub fn decode(frame: &Frame) -> Result<Option<Packet>, ProtocolError> {
    let Some(code) = PacketCode::from_byte(frame.code) else {
        return Ok(None);
    };

    let payload = frame.payload.as_slice();
    if payload.len() < code.min_payload() {
        return Err(ProtocolError::FrameTooShort {
            code: frame.code,
            expected: code.min_payload(),
            actual: payload.len(),
        });
    }

    let packet = match code {
        PacketCode::Ecg => Packet::Ecg(EcgFrame::parse(payload)),
        PacketCode::RespWaveform => Packet::RespWaveform(payload[0]),
        PacketCode::RespRate => Packet::RespRate(classify_resp_rate(payload[4])),
        PacketCode::Oximetry => Packet::Oximetry {
            pleth: payload[1],
            spo2: classify_spo2(payload[3]),
            pulse: classify_pulse(BigEndian::read_u16(&payload[4..6])),
        },
    };
    Ok(Some(packet))
}
