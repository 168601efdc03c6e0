//! Application entity configuration and callback surface.
//!
//! The [`ApplicationEntity`] holds the policy an association
//! supervisor reads while negotiating and running a session:
//! identification, timeouts, admission requirements,
//! presentation context proposals and offerings,
//! the registered service class handlers,
//! and the [`AssociationMonitor`] callbacks.
//!
//! The entity does not listen for connections itself;
//! the embedding application accepts TCP streams
//! (or decides to call out to a peer)
//! and hands them to [`Association`](crate::association::Association).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::association::scp::ServiceClassScp;
use crate::association::AssociationParameters;
use crate::association::negotiation::{PresentationContext, PresentationContextOffer};
use crate::pdu::{AbortRQSource, AssociationRJ, UserIdentity, DEFAULT_MAX_PDU};

/// Observer of association lifecycle events.
///
/// All callbacks are invoked on the supervisor task of the
/// association they concern, at most once per association,
/// in the order the transitions occur. Implementations
/// should return promptly and must not block.
pub trait AssociationMonitor: Send + Sync {
    /// The association has been established.
    fn on_association_accepted(&self, _parameters: &AssociationParameters) {}

    /// An association attempt was rejected,
    /// by this node (acceptor role) or by the peer (requestor role).
    fn on_association_rejected(&self, _rejection: &AssociationRJ) {}

    /// The association was released.
    fn on_association_released(&self) {}

    /// The association was aborted; the source primitive
    /// distinguishes peer aborts from provider-initiated ones.
    fn on_association_aborted(&self, _source: &AbortRQSource) {}
}

/// The default monitor: ignores every event.
#[derive(Debug, Default, Copy, Clone)]
struct NullMonitor;

impl AssociationMonitor for NullMonitor {}

/// A DICOM application entity.
///
/// Built through [`ApplicationEntityBuilder`];
/// immutable once built, so that every association supervisor
/// can read its policy without synchronization.
pub struct ApplicationEntity {
    address: String,
    port: u16,
    ae_title: String,
    network_timeout: Option<Duration>,
    acse_timeout: Option<Duration>,
    dimse_timeout: Option<Duration>,
    max_pdu_length: u32,
    require_calling_aet: String,
    require_called_aet: String,
    maximum_associations: usize,
    presentation_contexts_scu: Vec<PresentationContext>,
    presentation_contexts_scp: Vec<PresentationContextOffer>,
    extended_negotiation: Vec<(String, Vec<u8>)>,
    user_identity: Option<UserIdentity>,
    scp_handlers: HashMap<String, Arc<dyn ServiceClassScp>>,
    monitor: Arc<dyn AssociationMonitor>,
    /// number of associations currently alive,
    /// maintained by the embedding application
    active_associations: AtomicUsize,
}

impl std::fmt::Debug for ApplicationEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationEntity")
            .field("ae_title", &self.ae_title)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("max_pdu_length", &self.max_pdu_length)
            .finish()
    }
}

impl ApplicationEntity {
    /// Start building an application entity.
    pub fn builder() -> ApplicationEntityBuilder {
        ApplicationEntityBuilder::default()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ae_title(&self) -> &str {
        &self.ae_title
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    pub fn acse_timeout(&self) -> Option<Duration> {
        self.acse_timeout
    }

    pub fn dimse_timeout(&self) -> Option<Duration> {
        self.dimse_timeout
    }

    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    /// The calling AE title required from peers; empty admits any.
    pub fn require_calling_aet(&self) -> &str {
        &self.require_calling_aet
    }

    /// The called AE title required from peers; empty admits any.
    pub fn require_called_aet(&self) -> &str {
        &self.require_called_aet
    }

    pub fn maximum_associations(&self) -> usize {
        self.maximum_associations
    }

    /// The presentation contexts proposed when requesting associations.
    pub fn presentation_contexts_scu(&self) -> &[PresentationContext] {
        &self.presentation_contexts_scu
    }

    /// The presentation contexts offered when accepting associations.
    pub fn presentation_contexts_scp(&self) -> &[PresentationContextOffer] {
        &self.presentation_contexts_scp
    }

    pub fn extended_negotiation(&self) -> &[(String, Vec<u8>)] {
        &self.extended_negotiation
    }

    pub fn user_identity(&self) -> Option<&UserIdentity> {
        self.user_identity.as_ref()
    }

    /// The handler registered for the given abstract syntax, if any.
    pub fn scp_handler(&self, abstract_syntax: &str) -> Option<Arc<dyn ServiceClassScp>> {
        self.scp_handlers.get(abstract_syntax).cloned()
    }

    pub fn monitor(&self) -> &dyn AssociationMonitor {
        &*self.monitor
    }

    /// The number of currently registered associations.
    ///
    /// The supervisor only reads this during admission;
    /// the embedding application moves it up and down
    /// with [`register_association`](Self::register_association)
    /// and [`unregister_association`](Self::unregister_association).
    pub fn active_association_count(&self) -> usize {
        self.active_associations.load(Ordering::SeqCst)
    }

    /// Record one more active association.
    pub fn register_association(&self) {
        self.active_associations.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that an active association terminated.
    pub fn unregister_association(&self) {
        let _ = self
            .active_associations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });
    }
}

/// Builder for [`ApplicationEntity`].
pub struct ApplicationEntityBuilder {
    address: String,
    port: u16,
    ae_title: String,
    network_timeout: Option<Duration>,
    acse_timeout: Option<Duration>,
    dimse_timeout: Option<Duration>,
    max_pdu_length: u32,
    require_calling_aet: String,
    require_called_aet: String,
    maximum_associations: usize,
    presentation_contexts_scu: Vec<PresentationContext>,
    presentation_contexts_scp: Vec<PresentationContextOffer>,
    extended_negotiation: Vec<(String, Vec<u8>)>,
    user_identity: Option<UserIdentity>,
    scp_handlers: HashMap<String, Arc<dyn ServiceClassScp>>,
    monitor: Arc<dyn AssociationMonitor>,
}

impl Default for ApplicationEntityBuilder {
    fn default() -> Self {
        ApplicationEntityBuilder {
            address: "0.0.0.0".to_string(),
            port: 104,
            ae_title: "THIS-AE".to_string(),
            network_timeout: None,
            acse_timeout: Some(Duration::from_secs(30)),
            dimse_timeout: None,
            max_pdu_length: DEFAULT_MAX_PDU,
            require_calling_aet: String::new(),
            require_called_aet: String::new(),
            maximum_associations: 25,
            presentation_contexts_scu: Vec::new(),
            presentation_contexts_scp: Vec::new(),
            extended_negotiation: Vec::new(),
            user_identity: None,
            scp_handlers: HashMap::new(),
            monitor: Arc::new(NullMonitor),
        }
    }
}

impl ApplicationEntityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the network address this entity binds or reports.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Define the application entity title of this node.
    ///
    /// The default is `THIS-AE`.
    pub fn ae_title(mut self, ae_title: impl Into<String>) -> Self {
        self.ae_title = ae_title.into();
        self
    }

    /// Bound the maximum quiescent period of established associations.
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    /// Bound every association control exchange.
    ///
    /// The default is 30 seconds; `None` disables the timeout.
    pub fn acse_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acse_timeout = timeout;
        self
    }

    /// Bound each DIMSE receive.
    ///
    /// The default is no timeout (wait indefinitely).
    pub fn dimse_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dimse_timeout = timeout;
        self
    }

    /// Override the maximum PDU length admitted on receive.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Only admit peers calling with this AE title.
    pub fn require_calling_aet(mut self, aet: impl Into<String>) -> Self {
        self.require_calling_aet = aet.into();
        self
    }

    /// Only admit peers calling this AE title.
    pub fn require_called_aet(mut self, aet: impl Into<String>) -> Self {
        self.require_called_aet = aet.into();
        self
    }

    /// Limit the number of concurrently admitted associations.
    pub fn maximum_associations(mut self, maximum: usize) -> Self {
        self.maximum_associations = maximum;
        self
    }

    /// Include this presentation context
    /// in the proposals of requested associations.
    pub fn with_scu_context(mut self, context: PresentationContext) -> Self {
        self.presentation_contexts_scu.push(context);
        self
    }

    /// Include this offering when accepting associations.
    pub fn with_scp_offer(mut self, offer: PresentationContextOffer) -> Self {
        self.presentation_contexts_scp.push(offer);
        self
    }

    /// Attach an extended negotiation item to association proposals.
    pub fn with_extended_negotiation(
        mut self,
        sop_class_uid: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.extended_negotiation.push((sop_class_uid.into(), data));
        self
    }

    /// Attach a user identity to association proposals.
    pub fn user_identity(mut self, identity: UserIdentity) -> Self {
        self.user_identity = Some(identity);
        self
    }

    /// Register a service class handler for the given abstract syntax.
    pub fn with_scp_handler(
        mut self,
        abstract_syntax: impl Into<String>,
        handler: Arc<dyn ServiceClassScp>,
    ) -> Self {
        self.scp_handlers.insert(abstract_syntax.into(), handler);
        self
    }

    /// Install the association lifecycle monitor.
    pub fn monitor(mut self, monitor: Arc<dyn AssociationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn build(self) -> ApplicationEntity {
        ApplicationEntity {
            address: self.address,
            port: self.port,
            ae_title: self.ae_title,
            network_timeout: self.network_timeout,
            acse_timeout: self.acse_timeout,
            dimse_timeout: self.dimse_timeout,
            max_pdu_length: self.max_pdu_length,
            require_calling_aet: self.require_calling_aet,
            require_called_aet: self.require_called_aet,
            maximum_associations: self.maximum_associations,
            presentation_contexts_scu: self.presentation_contexts_scu,
            presentation_contexts_scp: self.presentation_contexts_scp,
            extended_negotiation: self.extended_negotiation,
            user_identity: self.user_identity,
            scp_handlers: self.scp_handlers,
            monitor: self.monitor,
            active_associations: AtomicUsize::new(0),
        }
    }
}
