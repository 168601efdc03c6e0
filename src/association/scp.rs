//! Service class provider dispatch.
//!
//! Inbound DIMSE messages are routed to the [`ServiceClassScp`]
//! handler registered for the abstract syntax of the presentation
//! context the message arrived on. Handlers receive an explicit
//! [`ServiceContext`] carrying everything needed to answer:
//! the message layer, the negotiated context and the owning AE.

use std::sync::{Arc, Mutex};

use dicom_dictionary_std::uids;
use dicom_object::InMemDicomObject;
use tracing::{debug, warn};

use crate::ae::ApplicationEntity;
use crate::association::dul::DulProvider;
use crate::association::lock;
use crate::association::negotiation::PresentationContextNegotiated;
use crate::association::{AssociationParameters, Result};
use crate::dimse::commands::{self, status, CommandField};
use crate::dimse::{DimseMessage, DimseProvider};
use snafu::ResultExt;

/// A service class provider implementation for one or more SOP classes.
///
/// Handlers are registered on the [`ApplicationEntity`]
/// keyed by abstract syntax UID,
/// and invoked by the association supervisor
/// for every message received on a matching presentation context.
pub trait ServiceClassScp: Send + Sync {
    /// Handle one inbound DIMSE message.
    fn scp(&self, ctx: &mut ServiceContext<'_>, message: DimseMessage) -> Result<()>;
}

/// The execution context handed to a service class handler.
pub struct ServiceContext<'a> {
    ae: &'a Arc<ApplicationEntity>,
    context: &'a PresentationContextNegotiated,
    peer_ae_title: &'a str,
    peer_max_pdu_length: u32,
    dimse: DimseProvider,
}

impl<'a> ServiceContext<'a> {
    /// The owning application entity.
    pub fn ae(&self) -> &ApplicationEntity {
        self.ae
    }

    /// The accepted presentation context the message arrived on.
    pub fn presentation_context(&self) -> &PresentationContextNegotiated {
        self.context
    }

    /// The transfer syntax negotiated for this context.
    pub fn transfer_syntax(&self) -> &str {
        self.context
            .transfer_syntax
            .as_deref()
            .unwrap_or("1.2.840.10008.1.2")
    }

    /// The AE title of the peer node.
    pub fn peer_ae_title(&self) -> &str {
        self.peer_ae_title
    }

    /// The maximum PDU length admitted by the peer,
    /// 0 interpreted as unlimited upstream.
    pub fn max_pdu_length(&self) -> u32 {
        self.peer_max_pdu_length
    }

    /// Send a DIMSE message back on this presentation context.
    pub fn send_message(
        &self,
        command: &InMemDicomObject,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        self.dimse
            .send(command, data, self.context.id)
            .context(crate::association::DimseSnafu)
    }

    /// Receive a follow-up DIMSE message, bounded by the DIMSE timeout.
    pub fn receive_message(&self) -> Result<Option<DimseMessage>> {
        self.dimse
            .receive(true)
            .context(crate::association::DimseSnafu)
    }
}

/// Route one inbound message to the handler registered
/// for the presentation context it arrived on.
///
/// Messages referencing an id with no accepted context
/// are dropped with a warning, never dispatched.
pub(crate) fn dispatch_message(
    ae: &Arc<ApplicationEntity>,
    session: &Arc<Mutex<DulProvider>>,
    parameters: &AssociationParameters,
    peer_ae_title: &str,
    message: DimseMessage,
) {
    let pc_id = message.presentation_context_id;
    let context = parameters
        .presentation_contexts
        .iter()
        .find(|pc| pc.accepted() && pc.id == pc_id);
    let context = match context {
        Some(context) => context,
        None => {
            warn!(
                "Discarding message on unknown presentation context id {}",
                pc_id
            );
            return;
        }
    };

    let dimse = DimseProvider::new(Arc::clone(session), ae.dimse_timeout());
    match ae.scp_handler(&context.abstract_syntax) {
        Some(handler) => {
            let mut ctx = ServiceContext {
                ae,
                context,
                peer_ae_title,
                peer_max_pdu_length: lock(session).peer_max_pdu_length(),
                dimse,
            };
            if let Err(e) = handler.scp(&mut ctx, message) {
                warn!(
                    "Service class handler for `{}` failed: {}",
                    context.abstract_syntax, e
                );
            }
        }
        None => {
            warn!(
                "No service class handler registered for `{}`",
                context.abstract_syntax
            );
            // answer storage requests so that the peer is not left waiting
            if message.command_field().ok() == Some(CommandField::C_STORE_RQ as u16) {
                let rsp = commands::c_store_rsp(
                    message.message_id().unwrap_or(0),
                    &message.affected_sop_class_uid().unwrap_or_default(),
                    &message.affected_sop_instance_uid().unwrap_or_default(),
                    status::SOP_CLASS_NOT_SUPPORTED,
                );
                if let Err(e) = dimse.send(&rsp, None, pc_id) {
                    debug!("Could not refuse the storage request: {}", e);
                }
            }
        }
    }
}

/// The built-in verification service class provider:
/// answers C-ECHO requests with status success.
#[derive(Debug, Default, Copy, Clone)]
pub struct VerificationScp;

impl ServiceClassScp for VerificationScp {
    fn scp(&self, ctx: &mut ServiceContext<'_>, message: DimseMessage) -> Result<()> {
        let command_field = message
            .command_field()
            .context(crate::association::DimseSnafu)?;
        if command_field != CommandField::C_ECHO_RQ as u16 {
            warn!(
                "Unexpected command field {:#06x} on a verification context",
                command_field
            );
            return Ok(());
        }
        let message_id = message
            .message_id()
            .context(crate::association::DimseSnafu)?;
        debug!("Answering C-ECHO (msg id {})", message_id);
        let rsp = commands::c_echo_rsp(message_id, uids::VERIFICATION, status::SUCCESS);
        ctx.send_message(&rsp, None)
    }
}
