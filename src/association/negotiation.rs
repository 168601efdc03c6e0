//! Presentation context negotiation.
//!
//! The negotiator intersects the contexts proposed by a requestor
//! with the contexts an acceptor offers,
//! producing one answered context per proposed id, in proposal order.
//! It never rejects an association by itself;
//! deciding what to do with an empty accepted list
//! is up to the session supervisor.

use std::borrow::Cow;

use crate::association::uid::trim_uid;
use crate::pdu::{
    PresentationContextProposed as WireContextProposed, PresentationContextResultReason,
    RoleSelection,
};

/// An explicit SCP/SCU role policy for one presentation context,
/// always expressed from the requestor's point of view.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RolePolicy {
    /// whether the requestor may act as an SCU
    pub scu: bool,
    /// whether the requestor may act as an SCP
    pub scp: bool,
}

/// A presentation context as proposed by the association requestor:
/// an abstract syntax, the transfer syntaxes admitted for it,
/// and an optional explicit role selection.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContext {
    /// context identifier, an odd integer unique within the association
    pub id: u8,
    pub abstract_syntax: String,
    /// non-empty, in the requestor's order of preference
    pub transfer_syntaxes: Vec<String>,
    /// explicit role selection; `None` applies the default roles
    /// (requestor = SCU, acceptor = SCP)
    pub roles: Option<RolePolicy>,
}

impl PresentationContext {
    /// Create a proposed presentation context with default roles.
    pub fn new(
        id: u8,
        abstract_syntax: impl Into<String>,
        transfer_syntaxes: Vec<String>,
    ) -> Self {
        PresentationContext {
            id,
            abstract_syntax: abstract_syntax.into(),
            transfer_syntaxes,
            roles: None,
        }
    }

    /// Attach an explicit SCP/SCU role selection to this context.
    pub fn with_roles(mut self, scu: bool, scp: bool) -> Self {
        self.roles = Some(RolePolicy { scu, scp });
        self
    }

    /// Reconstruct the proposal from its wire form,
    /// reattaching any role selection sub-item
    /// carried in the request's user information.
    pub(crate) fn from_wire(pc: &WireContextProposed, role_selections: &[RoleSelection]) -> Self {
        let abstract_syntax = trim_uid(Cow::from(pc.abstract_syntax.as_str())).to_string();
        let roles = role_selections
            .iter()
            .find(|role_selection| {
                trim_uid(Cow::from(role_selection.sop_class_uid.as_str())) == abstract_syntax
            })
            .map(|role_selection| RolePolicy {
                scu: role_selection.scu_role,
                scp: role_selection.scp_role,
            });
        PresentationContext {
            id: pc.id,
            abstract_syntax,
            transfer_syntaxes: pc
                .transfer_syntaxes
                .iter()
                .map(|ts| trim_uid(Cow::from(ts.as_str())).to_string())
                .collect(),
            roles,
        }
    }
}

/// A presentation context offering on the acceptor side:
/// one abstract syntax the acceptor supports,
/// the transfer syntaxes it is willing to select
/// (in its own order of preference),
/// and an optional role policy for requestors
/// that negotiate roles explicitly.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextOffer {
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
    pub roles: Option<RolePolicy>,
}

impl PresentationContextOffer {
    /// Create an offering with no explicit role policy.
    pub fn new(abstract_syntax: impl Into<String>, transfer_syntaxes: Vec<String>) -> Self {
        PresentationContextOffer {
            abstract_syntax: abstract_syntax.into(),
            transfer_syntaxes,
            roles: None,
        }
    }

    /// Constrain the roles the acceptor will grant for this context.
    pub fn with_roles(mut self, scu: bool, scp: bool) -> Self {
        self.roles = Some(RolePolicy { scu, scp });
        self
    }
}

/// The outcome of negotiating one proposed presentation context.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextNegotiated {
    /// the id of the proposed context this answers
    pub id: u8,
    pub abstract_syntax: String,
    pub reason: PresentationContextResultReason,
    /// the single selected transfer syntax; `None` unless accepted
    pub transfer_syntax: Option<String>,
    /// whether the requestor acts as SCU on this context
    pub scu_role: bool,
    /// whether the requestor acts as SCP on this context
    pub scp_role: bool,
}

impl PresentationContextNegotiated {
    /// Whether this context was accepted.
    pub fn accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

/// Negotiate the proposed presentation contexts
/// against the acceptor's offerings.
///
/// The output carries one entry per proposed context,
/// in the same order, with the proposed id preserved.
/// Transfer syntax selection honors the acceptor's preference order.
/// Accepted roles are the conjunction of proposed and offered roles
/// when the proposal negotiates them explicitly,
/// and the defaults (requestor = SCU, acceptor = SCP) otherwise.
pub fn negotiate(
    proposed: &[PresentationContext],
    offered: &[PresentationContextOffer],
) -> Vec<PresentationContextNegotiated> {
    proposed
        .iter()
        .map(|pc| {
            let abstract_syntax = trim_uid(Cow::from(pc.abstract_syntax.as_str())).to_string();

            let offer = match offered.iter().find(|offer| {
                trim_uid(Cow::from(offer.abstract_syntax.as_str())) == abstract_syntax
            }) {
                Some(offer) => offer,
                None => {
                    return PresentationContextNegotiated {
                        id: pc.id,
                        abstract_syntax,
                        reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                        transfer_syntax: None,
                        scu_role: false,
                        scp_role: false,
                    };
                }
            };

            // first offered transfer syntax also proposed by the requestor,
            // so that the acceptor's preference order decides
            let transfer_syntax = offer.transfer_syntaxes.iter().find(|ts| {
                pc.transfer_syntaxes
                    .iter()
                    .any(|proposed_ts| proposed_ts == *ts)
            });

            let transfer_syntax = match transfer_syntax {
                Some(ts) => ts.clone(),
                None => {
                    return PresentationContextNegotiated {
                        id: pc.id,
                        abstract_syntax,
                        reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                        transfer_syntax: None,
                        scu_role: false,
                        scp_role: false,
                    };
                }
            };

            let (scu_role, scp_role) = match pc.roles {
                Some(proposed_roles) => {
                    let offered_roles = offer.roles.unwrap_or(RolePolicy {
                        scu: true,
                        scp: true,
                    });
                    (
                        proposed_roles.scu && offered_roles.scu,
                        proposed_roles.scp && offered_roles.scp,
                    )
                }
                None => (true, false),
            };

            PresentationContextNegotiated {
                id: pc.id,
                abstract_syntax,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: Some(transfer_syntax),
                scu_role,
                scp_role,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFICATION: &str = "1.2.840.10008.1.1";
    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
    const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

    #[test]
    fn accepts_with_acceptor_preference_order() {
        let proposed = vec![PresentationContext::new(
            1,
            VERIFICATION,
            vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()],
        )];
        let offered = vec![PresentationContextOffer::new(
            VERIFICATION,
            vec![IMPLICIT_VR_LE.to_string(), EXPLICIT_VR_LE.to_string()],
        )];

        let negotiated = negotiate(&proposed, &offered);
        assert_eq!(negotiated.len(), 1);
        assert!(negotiated[0].accepted());
        assert_eq!(negotiated[0].id, 1);
        // the acceptor prefers implicit VR LE, so it wins
        assert_eq!(negotiated[0].transfer_syntax.as_deref(), Some(IMPLICIT_VR_LE));
        assert!(negotiated[0].scu_role);
        assert!(!negotiated[0].scp_role);
    }

    #[test]
    fn rejects_unknown_abstract_syntax() {
        let proposed = vec![PresentationContext::new(
            1,
            CT_IMAGE_STORAGE,
            vec![IMPLICIT_VR_LE.to_string()],
        )];
        let offered = vec![PresentationContextOffer::new(
            VERIFICATION,
            vec![IMPLICIT_VR_LE.to_string()],
        )];

        let negotiated = negotiate(&proposed, &offered);
        assert_eq!(negotiated.len(), 1);
        assert_eq!(
            negotiated[0].reason,
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );
        assert_eq!(negotiated[0].transfer_syntax, None);
    }

    #[test]
    fn rejects_disjoint_transfer_syntaxes() {
        let proposed = vec![PresentationContext::new(
            1,
            CT_IMAGE_STORAGE,
            vec![EXPLICIT_VR_BE.to_string()],
        )];
        let offered = vec![PresentationContextOffer::new(
            CT_IMAGE_STORAGE,
            vec![IMPLICIT_VR_LE.to_string(), EXPLICIT_VR_LE.to_string()],
        )];

        let negotiated = negotiate(&proposed, &offered);
        assert_eq!(negotiated.len(), 1);
        assert_eq!(
            negotiated[0].reason,
            PresentationContextResultReason::TransferSyntaxesNotSupported
        );
        assert_eq!(negotiated[0].transfer_syntax, None);
        assert!(!negotiated[0].accepted());
    }

    #[test]
    fn preserves_proposal_order_and_ids() {
        let proposed = vec![
            PresentationContext::new(5, CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE.to_string()]),
            PresentationContext::new(1, VERIFICATION, vec![IMPLICIT_VR_LE.to_string()]),
            PresentationContext::new(3, "1.2.3.4", vec![IMPLICIT_VR_LE.to_string()]),
        ];
        let offered = vec![
            PresentationContextOffer::new(VERIFICATION, vec![IMPLICIT_VR_LE.to_string()]),
            PresentationContextOffer::new(CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE.to_string()]),
        ];

        let negotiated = negotiate(&proposed, &offered);
        assert_eq!(
            negotiated.iter().map(|pc| pc.id).collect::<Vec<_>>(),
            vec![5, 1, 3]
        );
        assert!(negotiated[0].accepted());
        assert!(negotiated[1].accepted());
        assert!(!negotiated[2].accepted());
    }

    #[test]
    fn negotiation_is_deterministic() {
        let proposed = vec![
            PresentationContext::new(
                1,
                VERIFICATION,
                vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()],
            ),
            PresentationContext::new(3, CT_IMAGE_STORAGE, vec![EXPLICIT_VR_BE.to_string()]),
        ];
        let offered = vec![
            PresentationContextOffer::new(
                VERIFICATION,
                vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()],
            ),
            PresentationContextOffer::new(CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE.to_string()]),
        ];

        assert_eq!(
            negotiate(&proposed, &offered),
            negotiate(&proposed, &offered)
        );
    }

    #[test]
    fn roles_are_conjoined_when_explicit() {
        let proposed = vec![
            PresentationContext::new(1, CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE.to_string()])
                .with_roles(false, true),
        ];

        // no explicit policy on the offer: the proposal passes through
        let offered =
            vec![PresentationContextOffer::new(CT_IMAGE_STORAGE, vec![IMPLICIT_VR_LE.to_string()])];
        let negotiated = negotiate(&proposed, &offered);
        assert!(!negotiated[0].scu_role);
        assert!(negotiated[0].scp_role);

        // explicit offer policy constrains the proposal
        let offered = vec![PresentationContextOffer::new(
            CT_IMAGE_STORAGE,
            vec![IMPLICIT_VR_LE.to_string()],
        )
        .with_roles(true, false)];
        let negotiated = negotiate(&proposed, &offered);
        assert!(!negotiated[0].scu_role);
        assert!(!negotiated[0].scp_role);
    }
}
