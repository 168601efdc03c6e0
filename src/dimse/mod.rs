//! DICOM message service element module.
//!
//! This layer turns command sets and data sets into P-DATA-TF traffic
//! and back. Outbound messages are fragmented so that no PDU exceeds
//! the maximum length advertised by the peer;
//! inbound fragments are reassembled per presentation context
//! until the last-fragment flag is seen.
//!
//! The presentation context id attached to a received message
//! is the one reported by the P-Data layer,
//! which is what message dispatch must route on.

pub mod commands;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::warn;

use crate::association::dul::{DulProvider, POLL_PERIOD};
use crate::association::lock;
use crate::pdu::{PDataValue, PDataValueType, Pdu, PDU_HEADER_SIZE};
use commands::{CommandDataSetType, Priority};

pub use commands::CommandField;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to read command set
    ReadCommandSet { source: dicom_object::ReadError },

    /// failed to write command set
    WriteCommandSet { source: dicom_object::WriteError },

    #[snafu(display("missing command set field `{}`", name))]
    MissingField { name: &'static str },

    #[snafu(display("invalid value in command set field `{}`", name))]
    ConvertField {
        name: &'static str,
        source: dicom_core::value::ConvertValueError,
    },

    /// failed to exchange PDUs with the upper layer session
    Session {
        source: crate::association::dul::Error,
    },

    /// the upper layer session ended while exchanging messages
    SessionLost,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A complete DIMSE message:
/// a command set, an optional data set kept as raw bytes
/// in the transfer syntax of its presentation context,
/// and the id of the presentation context it arrived or departs on.
#[derive(Debug, Clone)]
pub struct DimseMessage {
    pub presentation_context_id: u8,
    pub command: InMemDicomObject,
    pub data: Option<Vec<u8>>,
}

impl DimseMessage {
    fn int_field(&self, tag: dicom_core::Tag, name: &'static str) -> Result<u16> {
        self.command
            .get(tag)
            .context(MissingFieldSnafu { name })?
            .to_int::<u16>()
            .context(ConvertFieldSnafu { name })
    }

    fn uid_field(&self, tag: dicom_core::Tag, name: &'static str) -> Result<String> {
        Ok(self
            .command
            .get(tag)
            .context(MissingFieldSnafu { name })?
            .to_str()
            .context(ConvertFieldSnafu { name })?
            .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_string())
    }

    /// The command field code of this message.
    pub fn command_field(&self) -> Result<u16> {
        self.int_field(tags::COMMAND_FIELD, "Command Field")
    }

    /// The message id of a request message.
    pub fn message_id(&self) -> Result<u16> {
        self.int_field(tags::MESSAGE_ID, "Message ID")
    }

    /// The message id a response message answers.
    pub fn message_id_being_responded_to(&self) -> Result<u16> {
        self.int_field(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            "Message ID Being Responded To",
        )
    }

    /// The affected SOP class UID of this message.
    pub fn affected_sop_class_uid(&self) -> Result<String> {
        self.uid_field(tags::AFFECTED_SOP_CLASS_UID, "Affected SOP Class UID")
    }

    /// The affected SOP instance UID of this message.
    pub fn affected_sop_instance_uid(&self) -> Result<String> {
        self.uid_field(tags::AFFECTED_SOP_INSTANCE_UID, "Affected SOP Instance UID")
    }

    /// The status code of a response message.
    pub fn status(&self) -> Result<u16> {
        self.int_field(tags::STATUS, "Status")
    }

    /// The priority of a request message,
    /// downgraded to the default on invalid codes.
    pub fn priority(&self) -> Priority {
        self.command
            .get(tags::PRIORITY)
            .and_then(|e| e.to_int::<u16>().ok())
            .map(Priority::from_code)
            .unwrap_or_default()
    }

    /// Whether a data set accompanies the command set.
    pub fn has_data_set(&self) -> bool {
        self.data.is_some()
    }

    /// A C-MOVE/C-GET sub-operation counter, when present.
    pub fn sub_operations_remaining(&self) -> Option<u16> {
        self.optional_int(tags::NUMBER_OF_REMAINING_SUBOPERATIONS)
    }

    /// See [`sub_operations_remaining`](Self::sub_operations_remaining).
    pub fn sub_operations_completed(&self) -> Option<u16> {
        self.optional_int(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)
    }

    /// See [`sub_operations_remaining`](Self::sub_operations_remaining).
    pub fn sub_operations_failed(&self) -> Option<u16> {
        self.optional_int(tags::NUMBER_OF_FAILED_SUBOPERATIONS)
    }

    /// See [`sub_operations_remaining`](Self::sub_operations_remaining).
    pub fn sub_operations_warning(&self) -> Option<u16> {
        self.optional_int(tags::NUMBER_OF_WARNING_SUBOPERATIONS)
    }

    fn optional_int(&self, tag: dicom_core::Tag) -> Option<u16> {
        self.command.get(tag).and_then(|e| e.to_int::<u16>().ok())
    }
}

/// Encode a command set in the transfer syntax
/// mandated for command sets (implicit VR little endian).
pub fn encode_command_set(command: &InMemDicomObject) -> Result<Vec<u8>> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &ts)
        .context(WriteCommandSetSnafu)?;
    Ok(bytes)
}

/// Reassembles P-Data value fragments into complete DIMSE messages.
#[derive(Debug, Default)]
pub(crate) struct MessageAssembler {
    /// command set bytes still being accumulated, per context id
    commands: HashMap<u8, Vec<u8>>,
    /// command sets announcing a data set, awaiting its fragments
    pending_data: HashMap<u8, (InMemDicomObject, Vec<u8>)>,
    /// fully reassembled messages, in arrival order
    ready: VecDeque<DimseMessage>,
}

impl MessageAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one P-Data value fragment into the assembler.
    pub(crate) fn push_value(&mut self, value: PDataValue) -> Result<()> {
        let pc_id = value.presentation_context_id;
        match value.value_type {
            PDataValueType::Command => {
                let buffer = self.commands.entry(pc_id).or_default();
                buffer.extend(value.data);
                if !value.is_last {
                    return Ok(());
                }
                let bytes = self.commands.remove(&pc_id).unwrap_or_default();
                let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
                let command = InMemDicomObject::read_dataset_with_ts(&bytes[..], &ts)
                    .context(ReadCommandSetSnafu)?;
                let data_set_announced = command
                    .get(tags::COMMAND_DATA_SET_TYPE)
                    .and_then(|e| e.to_int::<u16>().ok())
                    .map_or(false, |v| v != CommandDataSetType::Absent as u16);
                if data_set_announced {
                    self.pending_data.insert(pc_id, (command, Vec::new()));
                } else {
                    self.ready.push_back(DimseMessage {
                        presentation_context_id: pc_id,
                        command,
                        data: None,
                    });
                }
            }
            PDataValueType::Data => match self.pending_data.get_mut(&pc_id) {
                Some((_, buffer)) => {
                    buffer.extend(value.data);
                    if value.is_last {
                        if let Some((command, data)) = self.pending_data.remove(&pc_id) {
                            self.ready.push_back(DimseMessage {
                                presentation_context_id: pc_id,
                                command,
                                data: Some(data),
                            });
                        }
                    }
                }
                None => {
                    warn!(
                        "Discarding data fragment with no pending command (context {})",
                        pc_id
                    );
                }
            },
        }
        Ok(())
    }

    /// Take the next fully reassembled message, if any.
    pub(crate) fn pop_ready(&mut self) -> Option<DimseMessage> {
        self.ready.pop_front()
    }
}

/// Split one DIMSE message into P-DATA-TF PDUs,
/// none of which exceeds the peer's maximum PDU length.
pub(crate) fn message_pdus(
    pc_id: u8,
    command: Vec<u8>,
    data: Option<Vec<u8>>,
    peer_max_pdu_length: u32,
) -> Vec<Pdu> {
    // each presentation data value costs 6 bytes:
    // item length (4), context id (1) and control header (1)
    let max_data_length = peer_max_pdu_length
        .saturating_sub(PDU_HEADER_SIZE)
        .max(PDU_HEADER_SIZE) as usize;

    // a command with a small data set travels as a single PDU
    if let Some(ref data_bytes) = data {
        let combined = command.len() + data_bytes.len() + 2 * PDU_HEADER_SIZE as usize;
        if combined <= peer_max_pdu_length as usize {
            return vec![Pdu::PData {
                data: vec![
                    PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Command,
                        is_last: true,
                        data: command,
                    },
                    PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Data,
                        is_last: true,
                        data: data_bytes.clone(),
                    },
                ],
            }];
        }
    }

    let mut pdus = Vec::new();
    chunked_pdus(&mut pdus, pc_id, PDataValueType::Command, command, max_data_length);
    if let Some(data_bytes) = data {
        chunked_pdus(&mut pdus, pc_id, PDataValueType::Data, data_bytes, max_data_length);
    }
    pdus
}

fn chunked_pdus(
    pdus: &mut Vec<Pdu>,
    pc_id: u8,
    value_type: PDataValueType,
    bytes: Vec<u8>,
    max_data_length: usize,
) {
    let total = bytes.len();
    let mut offset = 0;
    loop {
        let end = (offset + max_data_length).min(total);
        let is_last = end == total;
        pdus.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type,
                is_last,
                data: bytes[offset..end].to_vec(),
            }],
        });
        if is_last {
            break;
        }
        offset = end;
    }
}

/// The DIMSE provider view over a shared upper layer session.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Debug, Clone)]
pub struct DimseProvider {
    session: Arc<Mutex<DulProvider>>,
    dimse_timeout: Option<std::time::Duration>,
}

impl DimseProvider {
    pub(crate) fn new(
        session: Arc<Mutex<DulProvider>>,
        dimse_timeout: Option<std::time::Duration>,
    ) -> Self {
        DimseProvider {
            session,
            dimse_timeout,
        }
    }

    /// Send a DIMSE message over the given presentation context.
    ///
    /// The data set bytes, if any, must already be encoded
    /// in the transfer syntax negotiated for the context.
    pub fn send(
        &self,
        command: &InMemDicomObject,
        data: Option<Vec<u8>>,
        pc_id: u8,
    ) -> Result<()> {
        let command_bytes = encode_command_set(command)?;
        let mut session = lock(&self.session);
        let pdus = message_pdus(pc_id, command_bytes, data, session.peer_max_pdu_length());
        for pdu in &pdus {
            session.send(pdu).context(SessionSnafu)?;
        }
        Ok(())
    }

    /// Receive the next complete DIMSE message.
    ///
    /// With `wait` disabled this returns immediately;
    /// otherwise it blocks up to the configured DIMSE timeout
    /// (no timeout means waiting indefinitely).
    /// `Ok(None)` means no message within the allotted time.
    pub fn receive(&self, wait: bool) -> Result<Option<DimseMessage>> {
        let deadline = if wait {
            self.dimse_timeout.map(|timeout| Instant::now() + timeout)
        } else {
            None
        };

        loop {
            {
                let mut session = lock(&self.session);
                while let Some(pdu) =
                    session.take_matching(|pdu| matches!(pdu, Pdu::PData { .. }))
                {
                    if let Pdu::PData { data } = pdu {
                        for value in data {
                            session.assembler.push_value(value)?;
                        }
                    }
                }
                if let Some(message) = session.assembler.pop_ready() {
                    return Ok(Some(message));
                }
                if !session.is_alive() {
                    return SessionLostSnafu.fail();
                }
            }

            if !wait {
                return Ok(None);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::commands::status;
    use super::*;

    #[test]
    fn fragmentation_respects_peer_max_pdu() {
        let command = commands::c_store_rq(1, "1.2.840.10008.5.1.4.1.1.2", "1.2.3.4", Priority::Low);
        let command_bytes = encode_command_set(&command).unwrap();
        let data = vec![0x55u8; 40_000];

        let max_pdu = 4096u32;
        let pdus = message_pdus(1, command_bytes, Some(data.clone()), max_pdu);
        assert!(pdus.len() > 1);

        let mut reassembled = Vec::new();
        for pdu in &pdus {
            // check the property on the encoded frame itself
            let mut bytes = Vec::new();
            crate::pdu::write_pdu(&mut bytes, pdu).unwrap();
            assert!(bytes.len() as u32 <= max_pdu + PDU_HEADER_SIZE);

            if let Pdu::PData { data } = pdu {
                for value in data {
                    if value.value_type == PDataValueType::Data {
                        reassembled.extend_from_slice(&value.data);
                    }
                }
            }
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn assembler_rebuilds_fragmented_messages() {
        let command = commands::c_echo_rsp(9, "1.2.840.10008.1.1", status::SUCCESS);
        let command_bytes = encode_command_set(&command).unwrap();

        let pdus = message_pdus(5, command_bytes, None, crate::pdu::MINIMUM_PDU_SIZE);

        let mut assembler = MessageAssembler::new();
        for pdu in pdus {
            if let Pdu::PData { data } = pdu {
                for value in data {
                    assembler.push_value(value).unwrap();
                }
            }
        }

        let message = assembler.pop_ready().expect("message should be complete");
        assert_eq!(message.presentation_context_id, 5);
        assert_eq!(message.status().unwrap(), status::SUCCESS);
        assert_eq!(message.message_id_being_responded_to().unwrap(), 9);
        assert!(!message.has_data_set());
        assert!(assembler.pop_ready().is_none());
    }

    #[test]
    fn assembler_joins_command_and_data_set() {
        let command = commands::c_store_rq(3, "1.2.840.10008.5.1.4.1.1.7", "1.2.3.4.5", Priority::Medium);
        let command_bytes = encode_command_set(&command).unwrap();
        let data = (0..6000).map(|x| x as u8).collect::<Vec<u8>>();

        let pdus = message_pdus(7, command_bytes, Some(data.clone()), crate::pdu::MINIMUM_PDU_SIZE);

        let mut assembler = MessageAssembler::new();
        for pdu in pdus {
            if let Pdu::PData { data } = pdu {
                for value in data {
                    assembler.push_value(value).unwrap();
                }
            }
        }

        let message = assembler.pop_ready().expect("message should be complete");
        assert_eq!(message.presentation_context_id, 7);
        assert_eq!(
            message.command_field().unwrap(),
            CommandField::C_STORE_RQ as u16
        );
        assert_eq!(message.affected_sop_instance_uid().unwrap(), "1.2.3.4.5");
        assert_eq!(message.priority(), Priority::Medium);
        assert_eq!(message.data, Some(data));
    }
}
