//! Association control service element provider.
//!
//! The [`AcseProvider`] issues and receives the association control
//! primitives (A-ASSOCIATE, A-RELEASE, A-ABORT) over the shared
//! upper layer session. Every blocking exchange is bounded
//! by the configured ACSE timeout.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use snafu::{ResultExt, Snafu};
use tracing::warn;

use crate::association::dul::{DulProvider, POLL_PERIOD};
use crate::association::lock;
use crate::association::negotiation::{PresentationContext, PresentationContextNegotiated};
use crate::pdu::{
    AbortRQSource, AssociationAC, AssociationRJ, AssociationRJResult, AssociationRJSource,
    AssociationRQ, Pdu, PresentationContextProposed, PresentationContextResult, RoleSelection,
    UserIdentity, UserVariableItem, DEFAULT_MAX_PDU,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

/// The DICOM application context name,
/// the only one defined by the standard.
pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to exchange PDUs with the upper layer session
    Session {
        source: crate::association::dul::Error,
    },

    #[snafu(display("unexpected response `{}`", pdu.short_description()))]
    UnexpectedResponse { pdu: Pdu },

    /// the ACSE exchange exceeded its timeout
    Timeout,

    /// the upper layer session ended during the ACSE exchange
    SessionLost,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The classified reply to an association request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// the peer accepted the association
    Accepted(AssociationAC),
    /// the peer rejected the association
    Rejected(AssociationRJ),
    /// the peer or its provider aborted the association
    Aborted(AbortRQSource),
}

/// The association proposal issued by a requestor.
#[derive(Debug, Clone)]
pub(crate) struct AssociationProposal {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub max_pdu_length: u32,
    pub presentation_contexts: Vec<PresentationContext>,
    pub extended_negotiation: Vec<(String, Vec<u8>)>,
    pub user_identity: Option<UserIdentity>,
}

/// The ACSE provider view over a shared upper layer session.
#[derive(Debug, Clone)]
pub struct AcseProvider {
    session: Arc<Mutex<DulProvider>>,
    acse_timeout: Option<Duration>,
}

impl AcseProvider {
    pub(crate) fn new(session: Arc<Mutex<DulProvider>>, acse_timeout: Option<Duration>) -> Self {
        AcseProvider {
            session,
            acse_timeout,
        }
    }

    /// The maximum PDU length advertised by the peer,
    /// meaningful once the association has been accepted.
    pub fn max_pdu_length(&self) -> u32 {
        lock(&self.session).peer_max_pdu_length()
    }

    fn deadline(&self) -> Option<Instant> {
        self.acse_timeout.map(|timeout| Instant::now() + timeout)
    }

    /// Wait for one PDU matching the predicate,
    /// bounded by the ACSE timeout.
    fn wait_for(&self, pred: impl Fn(&Pdu) -> bool) -> Result<Pdu> {
        let deadline = self.deadline();
        loop {
            {
                let mut session = lock(&self.session);
                if let Some(pdu) = session.take_matching(&pred) {
                    return Ok(pdu);
                }
                if !session.is_alive() {
                    return SessionLostSnafu.fail();
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return TimeoutSnafu.fail();
                }
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }

    /// Issue an A-ASSOCIATE request and classify the reply.
    pub(crate) fn request(&self, proposal: AssociationProposal) -> Result<RequestOutcome> {
        let mut user_variables = vec![
            UserVariableItem::MaxLength(proposal.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        for context in &proposal.presentation_contexts {
            if let Some(roles) = context.roles {
                user_variables.push(UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: context.abstract_syntax.clone(),
                    scu_role: roles.scu,
                    scp_role: roles.scp,
                }));
            }
        }
        for (sop_class_uid, data) in &proposal.extended_negotiation {
            user_variables.push(UserVariableItem::SopClassExtendedNegotiation(
                sop_class_uid.clone(),
                data.clone(),
            ));
        }
        if let Some(user_identity) = proposal.user_identity {
            user_variables.push(UserVariableItem::UserIdentityItem(user_identity));
        }

        let rq = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: proposal.calling_ae_title,
            called_ae_title: proposal.called_ae_title,
            application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: proposal
                .presentation_contexts
                .iter()
                .map(|pc| PresentationContextProposed {
                    id: pc.id,
                    abstract_syntax: pc.abstract_syntax.clone(),
                    transfer_syntaxes: pc.transfer_syntaxes.clone(),
                })
                .collect(),
            user_variables,
        });

        lock(&self.session).send(&rq).context(SessionSnafu)?;

        let reply = self.wait_for(|pdu| {
            matches!(
                pdu,
                Pdu::AssociationAC { .. } | Pdu::AssociationRJ { .. } | Pdu::AbortRQ { .. }
            )
        })?;

        match reply {
            Pdu::AssociationAC(ac) => {
                let peer_max_pdu_length = ac
                    .user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);
                lock(&self.session).set_peer_max_pdu_length(peer_max_pdu_length);
                Ok(RequestOutcome::Accepted(ac))
            }
            Pdu::AssociationRJ(rj) => Ok(RequestOutcome::Rejected(rj)),
            Pdu::AbortRQ { source } => Ok(RequestOutcome::Aborted(source)),
            pdu => UnexpectedResponseSnafu { pdu }.fail(),
        }
    }

    /// Wait for an A-ASSOCIATE-RQ from the peer.
    pub(crate) fn receive_association_rq(&self) -> Result<AssociationRQ> {
        let pdu = self.wait_for(|pdu| matches!(pdu, Pdu::AssociationRQ { .. }))?;
        match pdu {
            Pdu::AssociationRQ(rq) => Ok(rq),
            pdu => UnexpectedResponseSnafu { pdu }.fail(),
        }
    }

    /// Build and send the A-ASSOCIATE-AC answering `rq`
    /// with the negotiated presentation contexts.
    ///
    /// Also records the maximum PDU length requested by the peer
    /// so that subsequent traffic is capped accordingly.
    pub(crate) fn accept(
        &self,
        rq: &AssociationRQ,
        negotiated: &[PresentationContextNegotiated],
        max_pdu_length: u32,
    ) -> Result<AssociationAC> {
        let requestor_max_pdu_length = rq
            .user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);

        let requestor_role_selections: Vec<&RoleSelection> = rq
            .user_variables
            .iter()
            .filter_map(|item| match item {
                UserVariableItem::RoleSelection(role_selection) => Some(role_selection),
                _ => None,
            })
            .collect();

        let mut user_variables = vec![
            UserVariableItem::MaxLength(max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        // answer role selection only for contexts that negotiated it
        for context in negotiated.iter().filter(|pc| pc.accepted()) {
            if requestor_role_selections
                .iter()
                .any(|rs| rs.sop_class_uid == context.abstract_syntax)
            {
                user_variables.push(UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: context.abstract_syntax.clone(),
                    scu_role: context.scu_role,
                    scp_role: context.scp_role,
                }));
            }
        }

        let ac = AssociationAC {
            protocol_version: 1,
            calling_ae_title: rq.calling_ae_title.clone(),
            called_ae_title: rq.called_ae_title.clone(),
            application_context_name: rq.application_context_name.clone(),
            presentation_contexts: negotiated
                .iter()
                .map(|pc| PresentationContextResult {
                    id: pc.id,
                    reason: pc.reason,
                    // the transfer syntax field is not significant
                    // unless the context was accepted
                    transfer_syntax: pc
                        .transfer_syntax
                        .clone()
                        .unwrap_or_else(|| "1.2.840.10008.1.2".to_string()),
                })
                .collect(),
            user_variables,
        };

        let mut session = lock(&self.session);
        session.set_peer_max_pdu_length(requestor_max_pdu_length);
        session
            .send(&Pdu::AssociationAC(ac.clone()))
            .context(SessionSnafu)?;
        Ok(ac)
    }

    /// Build and send an A-ASSOCIATE-RJ with the given result and source.
    pub(crate) fn reject(
        &self,
        result: AssociationRJResult,
        source: AssociationRJSource,
    ) -> Result<AssociationRJ> {
        let rj = AssociationRJ { result, source };
        lock(&self.session)
            .send(&Pdu::AssociationRJ(rj.clone()))
            .context(SessionSnafu)?;
        Ok(rj)
    }

    /// Issue an A-RELEASE request and wait for the peer's reply.
    pub fn release(&self) -> Result<()> {
        lock(&self.session)
            .send(&Pdu::ReleaseRQ)
            .context(SessionSnafu)?;
        let pdu = self.wait_for(|pdu| {
            matches!(pdu, Pdu::ReleaseRP | Pdu::AbortRQ { .. })
        })?;
        match pdu {
            Pdu::ReleaseRP => Ok(()),
            Pdu::AbortRQ { .. } => {
                warn!("Peer aborted while releasing the association");
                Ok(())
            }
            pdu => UnexpectedResponseSnafu { pdu }.fail(),
        }
    }

    /// Issue an A-ABORT with the given source.
    pub fn abort(&self, source: AbortRQSource) -> Result<()> {
        lock(&self.session)
            .send(&Pdu::AbortRQ { source })
            .context(SessionSnafu)?;
        Ok(())
    }

    /// Non-blocking poll for a peer release request.
    ///
    /// Returns true exactly once per release request;
    /// the release response is sent back before reporting it.
    pub fn check_release(&self) -> bool {
        let mut session = lock(&self.session);
        if session
            .take_matching(|pdu| matches!(pdu, Pdu::ReleaseRQ))
            .is_some()
        {
            if let Err(e) = session.send(&Pdu::ReleaseRP) {
                warn!("Could not reply to the release request: {}", e);
            }
            true
        } else {
            false
        }
    }

    /// Non-blocking poll for a peer abort.
    ///
    /// Returns the abort source exactly once per abort received.
    pub fn check_abort(&self) -> Option<AbortRQSource> {
        let mut session = lock(&self.session);
        match session.take_matching(|pdu| matches!(pdu, Pdu::AbortRQ { .. })) {
            Some(Pdu::AbortRQ { source }) => Some(source),
            _ => None,
        }
    }
}
