//! DICOM association module.
//!
//! An [`Association`] is the negotiated session between two
//! application entities. The entity owns one upper layer session
//! and a supervisor task driving it through negotiation,
//! the steady-state message loop and teardown.
//!
//! In the acceptor role, the supervisor waits for an association
//! request on an accepted TCP stream, applies the admission policy
//! of the owning [`ApplicationEntity`], negotiates presentation
//! contexts and dispatches inbound DIMSE messages to service class
//! handlers. In the requestor role it proposes an association to a
//! peer and leaves DIMSE traffic to the SCU request helpers
//! (see [`scu`](crate::association::scu)).

pub mod acse;
pub mod dul;
pub mod negotiation;
pub mod scp;
pub mod scu;
pub(crate) mod uid;

#[cfg(test)]
mod tests;

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use snafu::{ResultExt, Snafu};
use tracing::{debug, error, warn};

use crate::address::FullAeAddr;
use crate::ae::ApplicationEntity;
use crate::dimse::DimseProvider;
use crate::pdu::{
    AbortRQServiceProviderReason, AbortRQSource, AssociationRJResult,
    AssociationRJServiceProviderPresentationReason, AssociationRJServiceUserReason,
    AssociationRJSource, RoleSelection, UserIdentity, UserVariableItem,
};
use acse::{AcseProvider, AssociationProposal, RequestOutcome};
use dul::{DulProvider, POLL_PERIOD};
use negotiation::{negotiate, PresentationContext, PresentationContextNegotiated};

/// Lock a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// the association must be initialised with either the client socket or the peer address, never both or neither
    InvalidConfiguration,

    /// the association with the peer must be established first
    NotEstablished,

    #[snafu(display("unknown query model `{}`", model))]
    UnknownQueryModel { model: char },

    #[snafu(display("`{}` is not among the accepted presentation contexts", sop_class_uid))]
    NoMatchingContext { sop_class_uid: String },

    /// could not install the upper layer session
    InstallSession { source: dul::Error },

    /// could not start the association supervisor task
    SpawnSupervisor { source: std::io::Error },

    /// association control failure
    Acse { source: acse::Error },

    /// message exchange failure
    Dimse { source: crate::dimse::Error },

    /// could not encode the data set under the negotiated transfer syntax
    EncodeDataSet { source: dicom_object::WriteError },

    /// could not decode the received data set
    DecodeDataSet { source: dicom_object::ReadError },

    #[snafu(display("transfer syntax `{}` is not supported", uid))]
    UnsupportedTransferSyntax { uid: String },

    /// the requested service is not implemented
    Unimplemented,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The role of the local node in one association.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    /// the local node proposed the association
    Requestor,
    /// the local node accepted the connection
    Acceptor,
}

/// The lifecycle state of an association.
///
/// States move strictly forward;
/// once a terminal state is reached no transition leaves it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AssociationState {
    Idle,
    Negotiating,
    Established,
    Releasing,
    Released,
    Aborted,
    Refused,
    Failed,
}

impl AssociationState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssociationState::Released
                | AssociationState::Aborted
                | AssociationState::Refused
                | AssociationState::Failed
        )
    }
}

/// The parameters negotiated for an established association.
#[derive(Debug, Clone)]
pub struct AssociationParameters {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    /// the full negotiation outcome, one entry per proposed context
    pub presentation_contexts: Vec<PresentationContextNegotiated>,
    /// the maximum PDU length this node admits on receive
    pub local_max_pdu_length: u32,
    /// the maximum PDU length the peer admits, 0 meaning unlimited
    pub peer_max_pdu_length: u32,
    pub peer_implementation_class_uid: Option<String>,
    pub peer_implementation_version_name: Option<String>,
    /// extended negotiation items announced by the peer
    pub extended_negotiation: Vec<(String, Vec<u8>)>,
    /// user identity announced by the peer, if any
    pub user_identity: Option<UserIdentity>,
}

impl AssociationParameters {
    /// The accepted presentation contexts.
    pub fn accepted_contexts(&self) -> impl Iterator<Item = &PresentationContextNegotiated> {
        self.presentation_contexts.iter().filter(|pc| pc.accepted())
    }

    fn from_user_variables(
        user_variables: &[UserVariableItem],
    ) -> (Option<String>, Option<String>, Vec<(String, Vec<u8>)>, Option<UserIdentity>) {
        let mut implementation_class_uid = None;
        let mut implementation_version_name = None;
        let mut extended_negotiation = Vec::new();
        let mut user_identity = None;
        for item in user_variables {
            match item {
                UserVariableItem::ImplementationClassUID(uid) => {
                    implementation_class_uid = Some(uid.clone());
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    implementation_version_name = Some(name.clone());
                }
                UserVariableItem::SopClassExtendedNegotiation(uid, data) => {
                    extended_negotiation.push((uid.clone(), data.clone()));
                }
                UserVariableItem::UserIdentityItem(identity) => {
                    user_identity = Some(identity.clone());
                }
                _ => {}
            }
        }
        (
            implementation_class_uid,
            implementation_version_name,
            extended_negotiation,
            user_identity,
        )
    }
}

pub(crate) struct AssociationInner {
    ae: Arc<ApplicationEntity>,
    role: Role,
    peer: Option<FullAeAddr>,
    state: Mutex<AssociationState>,
    killed: AtomicBool,
    session: OnceLock<Arc<Mutex<DulProvider>>>,
    parameters: OnceLock<AssociationParameters>,
}

impl AssociationInner {
    /// Perform a state transition.
    ///
    /// This is the only place association state ever changes.
    /// Returns false when the association has already reached
    /// a terminal state, or when `expected` does not match.
    fn transition_impl(
        &self,
        expected: Option<AssociationState>,
        next: AssociationState,
    ) -> bool {
        let mut state = lock(&self.state);
        if state.is_terminal() {
            return false;
        }
        if let Some(expected) = expected {
            if *state != expected {
                return false;
            }
        }
        if *state == next {
            return false;
        }
        debug!("Association state: {:?} -> {:?}", *state, next);
        *state = next;
        true
    }

    fn transition(&self, next: AssociationState) -> bool {
        self.transition_impl(None, next)
    }

    fn transition_from(&self, expected: AssociationState, next: AssociationState) -> bool {
        self.transition_impl(Some(expected), next)
    }

    fn state(&self) -> AssociationState {
        *lock(&self.state)
    }

    pub(crate) fn is_established(&self) -> bool {
        self.state() == AssociationState::Established
    }

    pub(crate) fn ae(&self) -> &Arc<ApplicationEntity> {
        &self.ae
    }

    pub(crate) fn parameters(&self) -> Option<&AssociationParameters> {
        self.parameters.get()
    }

    pub(crate) fn session(&self) -> Option<Arc<Mutex<DulProvider>>> {
        self.session.get().cloned()
    }

    fn acse(&self) -> Option<AcseProvider> {
        self.session
            .get()
            .map(|session| AcseProvider::new(session.clone(), self.ae.acse_timeout()))
    }

    pub(crate) fn dimse(&self) -> Option<DimseProvider> {
        self.session
            .get()
            .map(|session| DimseProvider::new(session.clone(), self.ae.dimse_timeout()))
    }

    /// The AE title of the peer node, once established.
    pub(crate) fn peer_ae_title(&self) -> Option<String> {
        let parameters = self.parameters.get()?;
        Some(match self.role {
            Role::Requestor => parameters.called_ae_title.clone(),
            Role::Acceptor => parameters.calling_ae_title.clone(),
        })
    }

    /// Stop the association task and the upper layer session.
    ///
    /// Idempotent. Any non-terminal state left at this point
    /// resolves to `Failed`.
    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.transition(AssociationState::Failed);
        if let Some(session) = self.session.get() {
            // bounded retry until the session confirms shutdown
            for _ in 0..50 {
                if lock(session).stop() {
                    break;
                }
                std::thread::sleep(POLL_PERIOD);
            }
        }
    }
}

/// A DICOM association, acting as either requestor or acceptor.
///
/// The supervisor task owns the connection for the whole lifetime
/// of the association; this handle observes its state,
/// requests release or abort, and originates SCU requests
/// (see the [`scu`](crate::association::scu) helper methods).
///
/// Dropping the handle aborts the supervisor task.
pub struct Association {
    inner: Arc<AssociationInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("role", &self.inner.role)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Association {
    /// Create an association and start its supervisor task.
    ///
    /// Exactly one of `client_socket` (acceptor role)
    /// or `peer_ae` (requestor role) must be supplied;
    /// any other combination fails with [`Error::InvalidConfiguration`]
    /// without starting a task.
    pub fn new(
        ae: &Arc<ApplicationEntity>,
        client_socket: Option<TcpStream>,
        peer_ae: Option<FullAeAddr>,
    ) -> Result<Self> {
        let (role, socket, peer) = match (client_socket, peer_ae) {
            (Some(socket), None) => (Role::Acceptor, Some(socket), None),
            (None, Some(peer)) => (Role::Requestor, None, Some(peer)),
            _ => return InvalidConfigurationSnafu.fail(),
        };

        let inner = Arc::new(AssociationInner {
            ae: Arc::clone(ae),
            role,
            peer,
            state: Mutex::new(AssociationState::Idle),
            killed: AtomicBool::new(false),
            session: OnceLock::new(),
            parameters: OnceLock::new(),
        });

        if let Some(socket) = socket {
            let session = DulProvider::new(
                socket,
                inner.ae.max_pdu_length(),
                true,
                inner.ae.network_timeout(),
            )
            .context(InstallSessionSnafu)?;
            let _ = inner.session.set(Arc::new(Mutex::new(session)));
        }

        let task_inner = Arc::clone(&inner);
        let supervisor = std::thread::Builder::new()
            .name("dicom-association".to_string())
            .spawn(move || run_supervisor(task_inner))
            .context(SpawnSupervisorSnafu)?;

        Ok(Association {
            inner,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Accept an association on a connection received by the AE.
    pub fn accept(ae: &Arc<ApplicationEntity>, client_socket: TcpStream) -> Result<Self> {
        Self::new(ae, Some(client_socket), None)
    }

    /// Request an association with the given peer.
    pub fn request(ae: &Arc<ApplicationEntity>, peer_ae: FullAeAddr) -> Result<Self> {
        Self::new(ae, None, Some(peer_ae))
    }

    /// The role of the local node in this association.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The current lifecycle state.
    pub fn state(&self) -> AssociationState {
        self.inner.state()
    }

    /// Whether the association is currently established.
    pub fn is_established(&self) -> bool {
        self.inner.is_established()
    }

    /// The negotiated parameters, available once established.
    pub fn parameters(&self) -> Option<&AssociationParameters> {
        self.inner.parameters()
    }

    /// Block until the association is established,
    /// or until it reaches a terminal state or the timeout elapses.
    ///
    /// Returns whether the association is established.
    pub fn wait_established(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.inner.state();
            if state == AssociationState::Established {
                return true;
            }
            if state.is_terminal() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }

    /// Block until the association reaches a terminal state
    /// or the timeout elapses, returning the state observed last.
    pub fn wait_terminated(&self, timeout: Duration) -> AssociationState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.inner.state();
            if state.is_terminal() || Instant::now() >= deadline {
                return state;
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }

    /// Release the association gracefully.
    ///
    /// Issues an A-RELEASE exchange and stops the supervisor.
    /// Idempotent: calling this on an association
    /// that is not established has no effect.
    pub fn release(&self) -> Result<()> {
        if !self
            .inner
            .transition_from(AssociationState::Established, AssociationState::Releasing)
        {
            return Ok(());
        }
        let acse = match self.inner.acse() {
            Some(acse) => acse,
            None => {
                self.inner.kill();
                return Ok(());
            }
        };
        match acse.release() {
            Ok(()) => {
                if self.inner.transition(AssociationState::Released) {
                    self.inner.ae.monitor().on_association_released();
                }
                self.inner.kill();
                Ok(())
            }
            Err(e) => {
                warn!("Release failed: {}", e);
                self.inner.kill();
                Err(e).context(AcseSnafu)
            }
        }
    }

    /// Abort the association.
    ///
    /// Issues an A-ABORT with source service-user
    /// and reason not-significant, then stops the supervisor.
    /// Idempotent: aborting a terminated association has no effect.
    pub fn abort(&self) {
        if self.inner.transition(AssociationState::Aborted) {
            if let Some(acse) = self.inner.acse() {
                if let Err(e) = acse.abort(AbortRQSource::ServiceUser) {
                    debug!("Could not send abort to peer: {}", e);
                }
            }
        }
        self.inner.kill();
    }

    pub(crate) fn inner(&self) -> &AssociationInner {
        &self.inner
    }
}

impl Drop for Association {
    fn drop(&mut self) {
        self.inner.kill();
        if let Some(handle) = lock(&self.supervisor).take() {
            let _ = handle.join();
        }
    }
}

fn run_supervisor(inner: Arc<AssociationInner>) {
    match inner.role {
        Role::Acceptor => run_acceptor(&inner),
        Role::Requestor => run_requestor(&inner),
    }
}

fn run_acceptor(inner: &AssociationInner) {
    let acse = match inner.acse() {
        Some(acse) => acse,
        None => {
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };
    inner.transition(AssociationState::Negotiating);

    // 1. wait for the association request, bounded by the ACSE timeout
    let rq = match acse.receive_association_rq() {
        Ok(rq) => rq,
        Err(e) => {
            debug!("No association request received: {}", e);
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };

    let ae = inner.ae();

    // 2. admission policy, first match wins
    let rejection = if !ae.require_calling_aet().is_empty()
        && ae.require_calling_aet() != rq.calling_ae_title.trim()
    {
        Some((
            AssociationRJResult::Permanent,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized,
            ),
        ))
    } else if !ae.require_called_aet().is_empty()
        && !ae
            .require_called_aet()
            .eq_ignore_ascii_case(rq.called_ae_title.trim())
    {
        Some((
            AssociationRJResult::Permanent,
            AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            ),
        ))
    } else if ae.active_association_count() >= ae.maximum_associations() {
        Some((
            AssociationRJResult::Transient,
            AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
            ),
        ))
    } else {
        None
    };

    // 3. refuse inadmissible peers
    if let Some((result, source)) = rejection {
        match acse.reject(result, source) {
            Ok(rj) => {
                warn!(
                    "Association from `{}` rejected: {:?}",
                    rq.calling_ae_title, rj.source
                );
                if inner.transition(AssociationState::Refused) {
                    ae.monitor().on_association_rejected(&rj);
                }
            }
            Err(e) => {
                error!("Could not send association rejection: {}", e);
                inner.transition(AssociationState::Failed);
            }
        }
        inner.kill();
        return;
    }

    // 4. negotiate presentation contexts and answer
    let role_selections: Vec<RoleSelection> = rq
        .user_variables
        .iter()
        .filter_map(|item| match item {
            UserVariableItem::RoleSelection(role_selection) => Some(role_selection.clone()),
            _ => None,
        })
        .collect();
    let proposed: Vec<PresentationContext> = rq
        .presentation_contexts
        .iter()
        .map(|pc| PresentationContext::from_wire(pc, &role_selections))
        .collect();
    let negotiated = negotiate(&proposed, ae.presentation_contexts_scp());

    if let Err(e) = acse.accept(&rq, &negotiated, ae.max_pdu_length()) {
        error!("Could not send association acceptance: {}", e);
        inner.transition(AssociationState::Failed);
        inner.kill();
        return;
    }

    if negotiated.iter().all(|pc| !pc.accepted()) {
        warn!("No presentation contexts accepted, aborting the association");
        let _ = acse.abort(AbortRQSource::ServiceProvider(
            AbortRQServiceProviderReason::ReasonNotSpecified,
        ));
        inner.transition(AssociationState::Aborted);
        inner.kill();
        return;
    }

    // 5. established
    let (implementation_class_uid, implementation_version_name, extended_negotiation, user_identity) =
        AssociationParameters::from_user_variables(&rq.user_variables);
    let peer_max_pdu_length = rq
        .user_variables
        .iter()
        .find_map(|item| match item {
            UserVariableItem::MaxLength(len) => Some(*len),
            _ => None,
        })
        .unwrap_or(crate::pdu::DEFAULT_MAX_PDU);
    let parameters = AssociationParameters {
        calling_ae_title: rq.calling_ae_title.clone(),
        called_ae_title: rq.called_ae_title.clone(),
        application_context_name: rq.application_context_name.clone(),
        presentation_contexts: negotiated,
        local_max_pdu_length: ae.max_pdu_length(),
        peer_max_pdu_length,
        peer_implementation_class_uid: implementation_class_uid,
        peer_implementation_version_name: implementation_version_name,
        extended_negotiation,
        user_identity,
    };
    let _ = inner.parameters.set(parameters);

    if inner.transition(AssociationState::Established) {
        if let Some(parameters) = inner.parameters() {
            ae.monitor().on_association_accepted(parameters);
        }
    }

    // 6. steady-state loop with DIMSE dispatch
    steady_state_loop(inner, &acse, true);
}

fn run_requestor(inner: &AssociationInner) {
    let ae = inner.ae();

    // 1. precondition: something to propose
    if ae.presentation_contexts_scu().is_empty() {
        error!("No presentation contexts set for the SCU");
        inner.transition(AssociationState::Failed);
        inner.kill();
        return;
    }

    inner.transition(AssociationState::Negotiating);

    let peer = match &inner.peer {
        Some(peer) => peer.clone(),
        None => {
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };

    // 2. connect and install the session
    let socket = match connect_to(&peer, ae.network_timeout()) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Could not connect to `{}`: {}", peer, e);
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };
    let session = match DulProvider::new(socket, ae.max_pdu_length(), true, ae.network_timeout()) {
        Ok(session) => Arc::new(Mutex::new(session)),
        Err(e) => {
            error!("Could not install the upper layer session: {}", e);
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };
    let _ = inner.session.set(session);

    // a kill issued before the session was installed
    // could not stop it; close the window here
    if inner.killed.load(Ordering::SeqCst) {
        inner.kill();
        return;
    }

    let acse = match inner.acse() {
        Some(acse) => acse,
        None => {
            inner.transition(AssociationState::Failed);
            inner.kill();
            return;
        }
    };

    // 3. propose the association
    let proposal = AssociationProposal {
        calling_ae_title: ae.ae_title().to_string(),
        called_ae_title: peer.ae_title().to_string(),
        max_pdu_length: ae.max_pdu_length(),
        presentation_contexts: ae.presentation_contexts_scu().to_vec(),
        extended_negotiation: ae.extended_negotiation().to_vec(),
        user_identity: ae.user_identity().cloned(),
    };

    match acse.request(proposal) {
        Ok(RequestOutcome::Accepted(ac)) => {
            let role_selections: Vec<RoleSelection> = ac
                .user_variables
                .iter()
                .filter_map(|item| match item {
                    UserVariableItem::RoleSelection(role_selection) => {
                        Some(role_selection.clone())
                    }
                    _ => None,
                })
                .collect();

            let negotiated: Vec<PresentationContextNegotiated> = ac
                .presentation_contexts
                .iter()
                .filter_map(|result| {
                    let proposal = match ae
                        .presentation_contexts_scu()
                        .iter()
                        .find(|pc| pc.id == result.id)
                    {
                        Some(proposal) => proposal,
                        None => {
                            warn!(
                                "Discarding answer for unknown presentation context id {}",
                                result.id
                            );
                            return None;
                        }
                    };
                    let accepted = result.reason
                        == crate::pdu::PresentationContextResultReason::Acceptance;
                    let (scu_role, scp_role) = if accepted {
                        role_selections
                            .iter()
                            .find(|rs| rs.sop_class_uid == proposal.abstract_syntax)
                            .map(|rs| (rs.scu_role, rs.scp_role))
                            .unwrap_or((true, false))
                    } else {
                        (false, false)
                    };
                    Some(PresentationContextNegotiated {
                        id: result.id,
                        abstract_syntax: proposal.abstract_syntax.clone(),
                        reason: result.reason,
                        transfer_syntax: if accepted {
                            Some(result.transfer_syntax.clone())
                        } else {
                            None
                        },
                        scu_role,
                        scp_role,
                    })
                })
                .collect();

            if negotiated.iter().all(|pc| !pc.accepted()) {
                error!("No acceptable presentation contexts");
                let _ = acse.abort(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::ReasonNotSpecified,
                ));
                inner.transition(AssociationState::Aborted);
                inner.kill();
                return;
            }

            let (implementation_class_uid, implementation_version_name, extended_negotiation, user_identity) =
                AssociationParameters::from_user_variables(&ac.user_variables);
            let peer_max_pdu_length = ac
                .user_variables
                .iter()
                .find_map(|item| match item {
                    UserVariableItem::MaxLength(len) => Some(*len),
                    _ => None,
                })
                .unwrap_or(crate::pdu::DEFAULT_MAX_PDU);
            let parameters = AssociationParameters {
                calling_ae_title: ac.calling_ae_title.clone(),
                called_ae_title: ac.called_ae_title.clone(),
                application_context_name: ac.application_context_name.clone(),
                presentation_contexts: negotiated,
                local_max_pdu_length: ae.max_pdu_length(),
                peer_max_pdu_length,
                peer_implementation_class_uid: implementation_class_uid,
                peer_implementation_version_name: implementation_version_name,
                extended_negotiation,
                user_identity,
            };
            let _ = inner.parameters.set(parameters);

            if inner.transition(AssociationState::Established) {
                if let Some(parameters) = inner.parameters() {
                    ae.monitor().on_association_accepted(parameters);
                }
            }

            // 4. steady-state loop; SCU helpers drive DIMSE traffic
            steady_state_loop(inner, &acse, false);
        }
        Ok(RequestOutcome::Rejected(rj)) => {
            warn!("Association rejected by `{}`: {:?}", peer, rj.source);
            if inner.transition(AssociationState::Refused) {
                ae.monitor().on_association_rejected(&rj);
            }
            inner.kill();
        }
        Ok(RequestOutcome::Aborted(source)) => {
            warn!("Association aborted by the peer: {:?}", source);
            if inner.transition(AssociationState::Aborted) {
                ae.monitor().on_association_aborted(&source);
            }
            inner.kill();
        }
        Err(e) => {
            error!("Association request failed: {}", e);
            inner.transition(AssociationState::Failed);
            inner.kill();
        }
    }
}

/// The cooperative steady-state loop shared by both roles.
///
/// Polls for inbound DIMSE messages (acceptor only),
/// peer release and abort primitives,
/// session liveness and the idle timer,
/// yielding briefly between iterations.
fn steady_state_loop(inner: &AssociationInner, acse: &AcseProvider, dispatch_dimse: bool) {
    let session = match inner.session() {
        Some(session) => session,
        None => return,
    };
    let dimse = DimseProvider::new(Arc::clone(&session), inner.ae.dimse_timeout());

    while !inner.killed.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_PERIOD);

        // the loop only acts while established: a local release or abort
        // claims the state first and then owns the rest of the teardown
        if inner.state() != AssociationState::Established {
            break;
        }

        if dispatch_dimse {
            match dimse.receive(false) {
                Ok(Some(message)) => {
                    if let Some(parameters) = inner.parameters() {
                        let peer_ae_title =
                            inner.peer_ae_title().unwrap_or_default();
                        scp::dispatch_message(
                            inner.ae(),
                            &session,
                            parameters,
                            &peer_ae_title,
                            message,
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("DIMSE receive failed: {}", e);
                }
            }
        }

        if acse.check_release() {
            if inner.transition(AssociationState::Released) {
                inner.ae.monitor().on_association_released();
            }
            inner.kill();
            break;
        }

        if let Some(source) = acse.check_abort() {
            if inner.transition(AssociationState::Aborted) {
                inner.ae.monitor().on_association_aborted(&source);
            }
            inner.kill();
            break;
        }

        let (alive, idle_expired) = {
            let session = lock(&session);
            (session.is_alive(), session.idle_timer_expired())
        };

        if !alive {
            debug!("Upper layer session is gone");
            inner.transition(AssociationState::Failed);
            inner.kill();
            break;
        }

        if idle_expired {
            debug!("Idle timer expired, shutting the association down");
            inner.transition(AssociationState::Released);
            inner.kill();
            break;
        }
    }
}

fn connect_to(peer: &FullAeAddr, timeout: Option<Duration>) -> std::io::Result<TcpStream> {
    use std::net::ToSocketAddrs;
    match timeout {
        Some(timeout) => {
            let mut last_error = None;
            for addr in peer.to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(socket) => return Ok(socket),
                    Err(e) => last_error = Some(e),
                }
            }
            Err(last_error
                .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable)))
        }
        None => TcpStream::connect(peer.socket_addr()),
    }
}
