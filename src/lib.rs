//! This crate contains the association engine for DICOM nodes
//! communicating through the upper layer protocol.
//!
//! An association is the negotiated session between two application
//! entities over which DIMSE messages are exchanged.
//! The engine couples the three protocol layers involved:
//!
//! - The [`pdu`] module
//!   provides the data structures and codec for _protocol data units_,
//!   the framed units passed around on the wire.
//! - The [`dimse`] module
//!   provides the message layer:
//!   command set construction, fragmentation into P-Data values,
//!   and reassembly of inbound fragments into full messages.
//! - The [`association`] module
//!   comprises the session supervisor:
//!   it negotiates presentation contexts in either role,
//!   runs the steady-state event loop,
//!   dispatches inbound messages to service class handlers,
//!   and winds the connection down on every failure path.
//! - The [`ae`] module
//!   holds the application entity configuration and callback surface
//!   that the supervisor reads its policy from.
//!
//! Associations are driven by [`Association`],
//! created from an [`ApplicationEntity`]
//! with either an accepted TCP stream (acceptor role)
//! or a peer address (requestor role).

pub mod address;
pub mod ae;
pub mod association;
pub mod dimse;
pub mod pdu;

/// The implementation class UID advertised by this implementation
/// during association negotiation.
///
/// Generated as per the standard, part 5, section B.2.
/// This UID may change in future versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.305828436655648963334276952856457850280";

/// The implementation version name advertised by this implementation
/// during association negotiation.
///
/// This name may change in future versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "ASSOC-RS 0.1.0";

// re-exports

pub use address::FullAeAddr;
pub use ae::{ApplicationEntity, ApplicationEntityBuilder, AssociationMonitor};
pub use association::negotiation::{
    PresentationContext, PresentationContextNegotiated, PresentationContextOffer,
};
pub use association::scp::{ServiceClassScp, ServiceContext, VerificationScp};
pub use association::scu::{QueryModel, ServiceResponse};
pub use association::{Association, AssociationParameters, AssociationState, Role};
pub use dimse::commands::Priority;
pub use pdu::Pdu;
