//! DIMSE command set construction and classification.
//!
//! Command sets are small DICOM data sets in group 0000,
//! always encoded in implicit VR little endian.

use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use tracing::warn;

/// The command field codes of the DIMSE services.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CommandField {
    C_STORE_RQ = 0x0001,
    C_STORE_RSP = 0x8001,
    C_GET_RQ = 0x0010,
    C_GET_RSP = 0x8010,
    C_FIND_RQ = 0x0020,
    C_FIND_RSP = 0x8020,
    C_MOVE_RQ = 0x0021,
    C_MOVE_RSP = 0x8021,
    C_ECHO_RQ = 0x0030,
    C_ECHO_RSP = 0x8030,
    N_EVENT_REPORT_RQ = 0x0100,
    N_EVENT_REPORT_RSP = 0x8100,
    N_GET_RQ = 0x0110,
    N_GET_RSP = 0x8110,
    N_SET_RQ = 0x0120,
    N_SET_RSP = 0x8120,
    N_ACTION_RQ = 0x0130,
    N_ACTION_RSP = 0x8130,
    N_CREATE_RQ = 0x0140,
    N_CREATE_RSP = 0x8140,
    N_DELETE_RQ = 0x0150,
    N_DELETE_RSP = 0x8150,
    C_CANCEL_RQ = 0x0FFF,
}

/// The values of the command data set type field:
/// anything other than `Absent` announces
/// that a data set follows the command set.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CommandDataSetType {
    Present = 0x0001,
    Absent = 0x0101,
}

/// The priority attached to a DIMSE-C request.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Priority {
    Medium = 0x0000,
    High = 0x0001,
    Low = 0x0002,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

impl Priority {
    /// Interpret a priority code from a command set,
    /// downgrading unknown codes to medium with a warning.
    pub fn from_code(value: u16) -> Self {
        match value {
            0x0000 => Priority::Medium,
            0x0001 => Priority::High,
            0x0002 => Priority::Low,
            _ => {
                warn!("Invalid priority value {:#06x}", value);
                Priority::Medium
            }
        }
    }
}

/// DIMSE status code constants and classification,
/// per PS3.7 Annex C.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const CANCEL: u16 = 0xFE00;
    pub const PENDING: u16 = 0xFF00;
    pub const PENDING_WARNING: u16 = 0xFF01;
    /// base of the "error: cannot understand" failure class
    pub const CANNOT_UNDERSTAND: u16 = 0xC000;
    /// SOP class not supported
    pub const SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;

    /// Whether the operation is still in progress.
    pub fn is_pending(status: u16) -> bool {
        status == PENDING || status == PENDING_WARNING
    }

    /// Whether the status is of the warning class.
    pub fn is_warning(status: u16) -> bool {
        matches!(status, 0x0001 | 0x0107 | 0x0116) || (0xB000..=0xBFFF).contains(&status)
    }
}

/// Create a C-ECHO-RQ command set.
pub fn c_echo_rq(message_id: u16, sop_class_uid: &str) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_ECHO_RQ as u16]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Absent as u16]),
        ),
    ])
}

/// Create a C-ECHO-RSP command set.
pub fn c_echo_rsp(message_id_being_responded_to: u16, sop_class_uid: &str, status: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_ECHO_RSP as u16]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id_being_responded_to]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Absent as u16]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
    ])
}

/// Create a C-STORE-RQ command set.
pub fn c_store_rq(
    message_id: u16,
    affected_sop_class_uid: &str,
    affected_sop_instance_uid: &str,
    priority: Priority,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(affected_sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_STORE_RQ as u16]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::PRIORITY,
            VR::US,
            dicom_value!(U16, [priority as u16]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Present as u16]),
        ),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(affected_sop_instance_uid),
        ),
    ])
}

/// Create a C-STORE-RSP command set.
pub fn c_store_rsp(
    message_id_being_responded_to: u16,
    affected_sop_class_uid: &str,
    affected_sop_instance_uid: &str,
    status: u16,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(affected_sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_STORE_RSP as u16]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id_being_responded_to]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Absent as u16]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(affected_sop_instance_uid),
        ),
    ])
}

/// Create a C-FIND-RQ command set.
pub fn c_find_rq(message_id: u16, sop_class_uid: &str, priority: Priority) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_FIND_RQ as u16]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::PRIORITY,
            VR::US,
            dicom_value!(U16, [priority as u16]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Present as u16]),
        ),
    ])
}

/// Create a C-FIND-RSP command set.
pub fn c_find_rsp(
    message_id_being_responded_to: u16,
    sop_class_uid: &str,
    status: u16,
    dataset_present: bool,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_FIND_RSP as u16]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id_being_responded_to]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(
                U16,
                [if dataset_present {
                    CommandDataSetType::Present as u16
                } else {
                    CommandDataSetType::Absent as u16
                }]
            ),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
    ])
}

/// Create a C-MOVE-RQ command set.
pub fn c_move_rq(
    message_id: u16,
    sop_class_uid: &str,
    priority: Priority,
    move_destination: &str,
) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_MOVE_RQ as u16]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::PRIORITY,
            VR::US,
            dicom_value!(U16, [priority as u16]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Present as u16]),
        ),
        DataElement::new(
            tags::MOVE_DESTINATION,
            VR::AE,
            PrimitiveValue::from(move_destination),
        ),
    ])
}

/// Create a C-GET-RQ command set.
pub fn c_get_rq(message_id: u16, sop_class_uid: &str, priority: Priority) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [CommandField::C_GET_RQ as u16]),
        ),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(
            tags::PRIORITY,
            VR::US,
            dicom_value!(U16, [priority as u16]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [CommandDataSetType::Present as u16]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_rq_command_set() {
        let obj = c_echo_rq(7, "1.2.840.10008.1.1");
        assert_eq!(
            obj.element(tags::COMMAND_FIELD)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            CommandField::C_ECHO_RQ as u16
        );
        assert_eq!(
            obj.element(tags::MESSAGE_ID)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            7
        );
        assert_eq!(
            obj.element(tags::COMMAND_DATA_SET_TYPE)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            CommandDataSetType::Absent as u16
        );
    }

    #[test]
    fn priority_codes() {
        assert_eq!(Priority::from_code(0x0000), Priority::Medium);
        assert_eq!(Priority::from_code(0x0001), Priority::High);
        assert_eq!(Priority::from_code(0x0002), Priority::Low);
        // out-of-range codes downgrade instead of failing
        assert_eq!(Priority::from_code(0x0042), Priority::Medium);
        assert_eq!(Priority::default(), Priority::Low);
    }

    #[test]
    fn status_classes() {
        assert!(status::is_pending(0xFF00));
        assert!(status::is_pending(0xFF01));
        assert!(!status::is_pending(status::SUCCESS));
        assert!(status::is_warning(0xB007));
        assert!(!status::is_warning(status::SUCCESS));
    }
}
