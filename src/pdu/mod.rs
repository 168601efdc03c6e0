//! Protocol data unit module.
//!
//! This module contains the data structures
//! representing the units framed on the wire
//! by the DICOM upper layer protocol,
//! plus the codec to read and write them
//! ([`read_pdu`], [`write_pdu`]).

pub mod reader;
pub mod writer;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

/// Cap for pre-allocated PDU buffers,
/// so that an unlimited negotiated size
/// does not reserve absurd amounts of memory upfront.
pub const LARGE_PDU_SIZE: u32 = 1_048_576;

/// A presentation context item as proposed in an A-ASSOCIATE-RQ:
/// one abstract syntax with the transfer syntaxes
/// the requestor is willing to use for it.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextProposed {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

/// A presentation context item as answered in an A-ASSOCIATE-AC.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    pub transfer_syntax: String,
}

/// The result/reason field of an answered presentation context.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub fn from(reason: u8) -> Option<Self> {
        match reason {
            0 => Some(PresentationContextResultReason::Acceptance),
            1 => Some(PresentationContextResultReason::UserRejection),
            2 => Some(PresentationContextResultReason::NoReason),
            3 => Some(PresentationContextResultReason::AbstractSyntaxNotSupported),
            4 => Some(PresentationContextResultReason::TransferSyntaxesNotSupported),
            _ => None,
        }
    }
}

/// The result field of an A-ASSOCIATE-RJ.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJResult {
    /// rejected-permanent (1)
    Permanent,
    /// rejected-transient (2)
    Transient,
}

impl AssociationRJResult {
    pub fn from(value: u8) -> Option<Self> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            AssociationRJResult::Permanent => 1,
            AssociationRJResult::Transient => 2,
        }
    }
}

/// The source and diagnostic of an A-ASSOCIATE-RJ,
/// per PS3.8 Table 9-21.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJSource {
    /// DICOM UL service-user (1)
    ServiceUser(AssociationRJServiceUserReason),
    /// DICOM UL service-provider, ACSE related function (2)
    ServiceProviderAcse(AssociationRJServiceProviderAcseReason),
    /// DICOM UL service-provider, presentation related function (3)
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    pub fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            1 => {
                let reason = match reason {
                    1 => AssociationRJServiceUserReason::NoReasonGiven,
                    2 => AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                    3 => AssociationRJServiceUserReason::CallingAETitleNotRecognized,
                    7 => AssociationRJServiceUserReason::CalledAETitleNotRecognized,
                    x @ 4..=6 | x @ 8..=10 => AssociationRJServiceUserReason::Reserved(x),
                    _ => return None,
                };
                Some(AssociationRJSource::ServiceUser(reason))
            }
            2 => {
                let reason = match reason {
                    1 => AssociationRJServiceProviderAcseReason::NoReasonGiven,
                    2 => AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported,
                    _ => return None,
                };
                Some(AssociationRJSource::ServiceProviderAcse(reason))
            }
            3 => {
                let reason = match reason {
                    1 => AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
                    2 => AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
                    x @ 0 | x @ 3..=7 => {
                        AssociationRJServiceProviderPresentationReason::Reserved(x)
                    }
                    _ => return None,
                };
                Some(AssociationRJSource::ServiceProviderPresentation(reason))
            }
            _ => None,
        }
    }

    /// The `(source, reason/diagnostic)` code pair on the wire.
    pub fn as_parts(&self) -> (u8, u8) {
        match self {
            AssociationRJSource::ServiceUser(reason) => (1, reason.code()),
            AssociationRJSource::ServiceProviderAcse(reason) => (2, reason.code()),
            AssociationRJSource::ServiceProviderPresentation(reason) => (3, reason.code()),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl AssociationRJServiceUserReason {
    pub(crate) fn code(self) -> u8 {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => 1,
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 2,
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => 3,
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => 7,
            AssociationRJServiceUserReason::Reserved(x) => x,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceProviderAcseReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl AssociationRJServiceProviderAcseReason {
    pub(crate) fn code(self) -> u8 {
        match self {
            AssociationRJServiceProviderAcseReason::NoReasonGiven => 1,
            AssociationRJServiceProviderAcseReason::ProtocolVersionNotSupported => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl AssociationRJServiceProviderPresentationReason {
    pub(crate) fn code(self) -> u8 {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 1,
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 2,
            AssociationRJServiceProviderPresentationReason::Reserved(x) => x,
        }
    }
}

/// The source field of an A-ABORT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AbortRQSource {
    /// DICOM UL service-user initiated abort (0)
    ServiceUser,
    /// DICOM UL service-provider initiated abort (2)
    ServiceProvider(AbortRQServiceProviderReason),
    /// reserved source value (1)
    Reserved,
}

impl AbortRQSource {
    pub fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            0 => Some(AbortRQSource::ServiceUser),
            1 => Some(AbortRQSource::Reserved),
            2 => {
                let reason = match reason {
                    0 => AbortRQServiceProviderReason::ReasonNotSpecified,
                    1 => AbortRQServiceProviderReason::UnrecognizedPdu,
                    2 => AbortRQServiceProviderReason::UnexpectedPdu,
                    3 => AbortRQServiceProviderReason::Reserved,
                    4 => AbortRQServiceProviderReason::UnrecognizedPduParameter,
                    5 => AbortRQServiceProviderReason::UnexpectedPduParameter,
                    6 => AbortRQServiceProviderReason::InvalidPduParameter,
                    _ => return None,
                };
                Some(AbortRQSource::ServiceProvider(reason))
            }
            _ => None,
        }
    }

    /// The `(source, reason/diagnostic)` code pair on the wire.
    pub fn as_parts(&self) -> (u8, u8) {
        match self {
            AbortRQSource::ServiceUser => (0, 0),
            AbortRQSource::Reserved => (1, 0),
            AbortRQSource::ServiceProvider(reason) => (2, reason.code()),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AbortRQServiceProviderReason {
    ReasonNotSpecified,
    UnrecognizedPdu,
    UnexpectedPdu,
    Reserved,
    UnrecognizedPduParameter,
    UnexpectedPduParameter,
    InvalidPduParameter,
}

impl AbortRQServiceProviderReason {
    pub(crate) fn code(self) -> u8 {
        match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => 0,
            AbortRQServiceProviderReason::UnrecognizedPdu => 1,
            AbortRQServiceProviderReason::UnexpectedPdu => 2,
            AbortRQServiceProviderReason::Reserved => 3,
            AbortRQServiceProviderReason::UnrecognizedPduParameter => 4,
            AbortRQServiceProviderReason::UnexpectedPduParameter => 5,
            AbortRQServiceProviderReason::InvalidPduParameter => 6,
        }
    }
}

/// A single presentation data value within a P-DATA-TF PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

/// Whether a presentation data value fragment
/// carries command set or data set bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PDataValueType {
    Command,
    Data,
}

/// An SCP/SCU role selection sub-item (0x54)
/// of the user information item.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RoleSelection {
    pub sop_class_uid: String,
    pub scu_role: bool,
    pub scp_role: bool,
}

/// The type of a user identity (0x58 sub-item).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum UserIdentityType {
    Username,
    UsernameAndPassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
}

impl UserIdentityType {
    pub fn from(value: u8) -> Option<Self> {
        match value {
            1 => Some(UserIdentityType::Username),
            2 => Some(UserIdentityType::UsernameAndPassword),
            3 => Some(UserIdentityType::KerberosServiceTicket),
            4 => Some(UserIdentityType::SamlAssertion),
            5 => Some(UserIdentityType::Jwt),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            UserIdentityType::Username => 1,
            UserIdentityType::UsernameAndPassword => 2,
            UserIdentityType::KerberosServiceTicket => 3,
            UserIdentityType::SamlAssertion => 4,
            UserIdentityType::Jwt => 5,
        }
    }
}

/// A user identity negotiation sub-item (0x58).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct UserIdentity {
    pub identity_type: UserIdentityType,
    pub positive_response_requested: bool,
    pub primary_field: Vec<u8>,
    pub secondary_field: Vec<u8>,
}

/// A sub-item of the user information item.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum UserVariableItem {
    Unknown(u8, Vec<u8>),
    MaxLength(u32),
    ImplementationClassUID(String),
    ImplementationVersionName(String),
    RoleSelection(RoleSelection),
    SopClassExtendedNegotiation(String, Vec<u8>),
    UserIdentityItem(UserIdentity),
}

/// An intermediate variable item of an association PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// The contents of an A-ASSOCIATE-RQ PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

/// The contents of an A-ASSOCIATE-AC PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

/// The contents of an A-ASSOCIATE-RJ PDU.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

/// A protocol data unit of the DICOM upper layer protocol.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Pdu {
    Unknown { pdu_type: u8, data: Vec<u8> },
    AssociationRQ(AssociationRQ),
    AssociationAC(AssociationAC),
    AssociationRJ(AssociationRJ),
    PData { data: Vec<PDataValue> },
    ReleaseRQ,
    ReleaseRP,
    AbortRQ { source: AbortRQSource },
}

impl Pdu {
    /// A short description of the PDU variant,
    /// suitable for event logs.
    pub fn short_description(&self) -> &'static str {
        match self {
            Pdu::Unknown { .. } => "Unknown",
            Pdu::AssociationRQ { .. } => "A-ASSOCIATE-RQ",
            Pdu::AssociationAC { .. } => "A-ASSOCIATE-AC",
            Pdu::AssociationRJ { .. } => "A-ASSOCIATE-RJ",
            Pdu::PData { .. } => "P-DATA-TF",
            Pdu::ReleaseRQ => "A-RELEASE-RQ",
            Pdu::ReleaseRP => "A-RELEASE-RP",
            Pdu::AbortRQ { .. } => "A-ABORT",
        }
    }
}
