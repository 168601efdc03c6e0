use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;

use crate::ae::{ApplicationEntity, AssociationMonitor};
use crate::address::FullAeAddr;
use crate::association::negotiation::{PresentationContext, PresentationContextOffer};
use crate::association::scp::{ServiceClassScp, ServiceContext, VerificationScp};
use crate::association::{Association, AssociationState, Error};
use crate::dimse::commands::{self, status, CommandField, Priority};
use crate::dimse::DimseMessage;
use crate::pdu::{
    AbortRQSource, AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason,
    AssociationRJServiceProviderPresentationReason, AssociationRJSource,
};

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";

const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts every lifecycle callback and remembers the last primitives.
#[derive(Default)]
struct CountingMonitor {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    released: AtomicUsize,
    aborted: AtomicUsize,
    last_rejection: Mutex<Option<AssociationRJ>>,
    last_abort: Mutex<Option<AbortRQSource>>,
}

impl AssociationMonitor for CountingMonitor {
    fn on_association_accepted(&self, _parameters: &super::AssociationParameters) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_association_rejected(&self, rejection: &AssociationRJ) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        *self.last_rejection.lock().unwrap() = Some(rejection.clone());
    }

    fn on_association_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn on_association_aborted(&self, source: &AbortRQSource) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        *self.last_abort.lock().unwrap() = Some(*source);
    }
}

fn verification_scp_ae(monitor: Arc<CountingMonitor>) -> Arc<ApplicationEntity> {
    Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .with_scp_offer(PresentationContextOffer::new(
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string(), EXPLICIT_VR_LE.to_string()],
            ))
            .with_scp_handler(uids::VERIFICATION, Arc::new(VerificationScp))
            .monitor(monitor)
            .build(),
    )
}

fn verification_scu_ae(monitor: Arc<CountingMonitor>) -> Arc<ApplicationEntity> {
    Arc::new(
        ApplicationEntity::builder()
            .ae_title("ECHO-SCU")
            .with_scu_context(PresentationContext::new(
                1,
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .monitor(monitor)
            .build(),
    )
}

fn request_to(
    ae: &Arc<ApplicationEntity>,
    addr: std::net::SocketAddr,
    called_aet: &str,
) -> Association {
    Association::request(ae, FullAeAddr::new(called_aet, addr.to_string()))
        .expect("requestor construction should succeed")
}

#[test]
fn c_echo_round_trip_and_release() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = verification_scp_ae(Arc::clone(&scp_monitor));

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_monitor = Arc::new(CountingMonitor::default());
    let scu_ae = verification_scu_ae(Arc::clone(&scu_monitor));
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");

    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));
    let parameters = assoc.parameters().expect("parameters should be populated");
    let accepted: Vec<_> = parameters.accepted_contexts().collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id, 1);
    assert_eq!(accepted[0].transfer_syntax.as_deref(), Some(IMPLICIT_VR_LE));

    let echo_status = assoc.send_c_echo(1).unwrap();
    assert_eq!(echo_status, Some(status::SUCCESS));

    assoc.release().unwrap();
    assert_eq!(assoc.state(), AssociationState::Released);

    // releasing again has no further observable effect
    assoc.release().unwrap();
    assert_eq!(assoc.state(), AssociationState::Released);

    let scp_state = server.join().unwrap();
    assert_eq!(scp_state, AssociationState::Released);

    // dropping joins the supervisor, so all callbacks have fired
    drop(assoc);
    assert_eq!(scu_monitor.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(scu_monitor.released.load(Ordering::SeqCst), 1);
    assert_eq!(scu_monitor.aborted.load(Ordering::SeqCst), 0);
    assert_eq!(scp_monitor.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(scp_monitor.released.load(Ordering::SeqCst), 1);
    assert_eq!(scp_monitor.aborted.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_calling_ae_title_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .require_calling_aet("GOOD")
            .with_scp_offer(PresentationContextOffer::new(
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .with_scp_handler(uids::VERIFICATION, Arc::new(VerificationScp))
            .monitor(Arc::clone(&scp_monitor) as Arc<dyn AssociationMonitor>)
            .build(),
    );

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_monitor = Arc::new(CountingMonitor::default());
    let scu_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("BAD")
            .with_scu_context(PresentationContext::new(
                1,
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .monitor(Arc::clone(&scu_monitor) as Arc<dyn AssociationMonitor>)
            .build(),
    );
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");

    assert!(!assoc.wait_established(ESTABLISH_TIMEOUT));
    assert_eq!(
        assoc.wait_terminated(TERMINATE_TIMEOUT),
        AssociationState::Refused
    );

    let scp_state = server.join().unwrap();
    assert_eq!(scp_state, AssociationState::Refused);

    drop(assoc);
    assert_eq!(scu_monitor.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(scp_monitor.rejected.load(Ordering::SeqCst), 1);

    // result permanent (1), source service-user (1), diagnostic 3
    let rejection = scu_monitor
        .last_rejection
        .lock()
        .unwrap()
        .clone()
        .expect("the rejection primitive should have been delivered");
    assert_eq!(rejection.result, AssociationRJResult::Permanent);
    assert_eq!(
        rejection.source,
        AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CallingAETitleNotRecognized
        )
    );
    assert_eq!(rejection.source.as_parts(), (1, 3));
}

#[test]
fn maximum_associations_is_enforced() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .maximum_associations(1)
            .with_scp_offer(PresentationContextOffer::new(
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .with_scp_handler(uids::VERIFICATION, Arc::new(VerificationScp))
            .monitor(Arc::clone(&scp_monitor) as Arc<dyn AssociationMonitor>)
            .build(),
    );
    // the embedding application already tracks one live association
    scp_ae.register_association();

    let server = {
        let scp_ae = Arc::clone(&scp_ae);
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let assoc = Association::accept(&scp_ae, stream).unwrap();
            assoc.wait_terminated(TERMINATE_TIMEOUT)
        })
    };

    let scu_monitor = Arc::new(CountingMonitor::default());
    let scu_ae = verification_scu_ae(Arc::clone(&scu_monitor));
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");

    assert_eq!(
        assoc.wait_terminated(TERMINATE_TIMEOUT),
        AssociationState::Refused
    );
    assert_eq!(server.join().unwrap(), AssociationState::Refused);

    drop(assoc);
    // result transient (2), source provider-presentation (3), diagnostic 2
    let rejection = scu_monitor
        .last_rejection
        .lock()
        .unwrap()
        .clone()
        .expect("the rejection primitive should have been delivered");
    assert_eq!(rejection.result, AssociationRJResult::Transient);
    assert_eq!(
        rejection.source,
        AssociationRJSource::ServiceProviderPresentation(
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded
        )
    );
    assert_eq!(rejection.source.as_parts(), (3, 2));
}

#[test]
fn no_common_transfer_syntax_aborts_both_sides() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .with_scp_offer(PresentationContextOffer::new(
                uids::CT_IMAGE_STORAGE,
                vec![IMPLICIT_VR_LE.to_string(), EXPLICIT_VR_LE.to_string()],
            ))
            .monitor(Arc::clone(&scp_monitor) as Arc<dyn AssociationMonitor>)
            .build(),
    );

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("STORE-SCU")
            .with_scu_context(PresentationContext::new(
                1,
                uids::CT_IMAGE_STORAGE,
                vec![EXPLICIT_VR_BE.to_string()],
            ))
            .build(),
    );
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");

    assert_eq!(
        assoc.wait_terminated(TERMINATE_TIMEOUT),
        AssociationState::Aborted
    );
    assert_eq!(server.join().unwrap(), AssociationState::Aborted);
}

#[test]
fn c_store_without_matching_context_is_refused_locally() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_ae = verification_scp_ae(Arc::new(CountingMonitor::default()));
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_ae = verification_scu_ae(Arc::new(CountingMonitor::default()));
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");
    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));

    let ct_dataset = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
    ]);

    match assoc.send_c_store(&ct_dataset, 1, Priority::Low) {
        Err(Error::NoMatchingContext { sop_class_uid }) => {
            assert_eq!(sop_class_uid, uids::CT_IMAGE_STORAGE);
        }
        other => panic!("expected NoMatchingContext, got {:?}", other.map(|_| ())),
    }

    assoc.release().unwrap();
    server.join().unwrap();
}

#[test]
fn c_store_encoding_failure_yields_cannot_understand() {
    // both peers agree on a transfer syntax
    // that no registry implementation can encode
    const BOGUS_TS: &str = "1.2.826.0.1.999999.1";

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .with_scp_offer(PresentationContextOffer::new(
                uids::CT_IMAGE_STORAGE,
                vec![BOGUS_TS.to_string()],
            ))
            .build(),
    );
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("STORE-SCU")
            .with_scu_context(PresentationContext::new(
                1,
                uids::CT_IMAGE_STORAGE,
                vec![BOGUS_TS.to_string()],
            ))
            .build(),
    );
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");
    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));

    let ct_dataset = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
    ]);

    let outcome = assoc.send_c_store(&ct_dataset, 1, Priority::Low).unwrap();
    assert_eq!(outcome, Some(status::CANNOT_UNDERSTAND));

    assoc.release().unwrap();
    server.join().unwrap();
}

#[test]
fn idle_timeout_tears_the_association_down() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("THIS-SCP")
            .network_timeout(Duration::from_millis(250))
            .with_scp_offer(PresentationContextOffer::new(
                uids::VERIFICATION,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .with_scp_handler(uids::VERIFICATION, Arc::new(VerificationScp))
            .monitor(Arc::clone(&scp_monitor) as Arc<dyn AssociationMonitor>)
            .build(),
    );

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_monitor = Arc::new(CountingMonitor::default());
    let scu_ae = verification_scu_ae(Arc::clone(&scu_monitor));
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");
    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));

    // no traffic: the acceptor's idle timer closes the association
    let scp_state = server.join().unwrap();
    assert_eq!(scp_state, AssociationState::Released);

    // the requestor observes the session going away
    let scu_state = assoc.wait_terminated(TERMINATE_TIMEOUT);
    assert_eq!(scu_state, AssociationState::Failed);

    // no callbacks beyond the first terminal transition
    drop(assoc);
    assert_eq!(scp_monitor.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(scp_monitor.released.load(Ordering::SeqCst), 0);
    assert_eq!(scp_monitor.aborted.load(Ordering::SeqCst), 0);
    assert_eq!(scu_monitor.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(scu_monitor.aborted.load(Ordering::SeqCst), 0);
}

#[test]
fn construction_requires_exactly_one_endpoint() {
    let ae = verification_scu_ae(Arc::new(CountingMonitor::default()));

    // neither endpoint
    match Association::new(&ae, None, None) {
        Err(Error::InvalidConfiguration) => {}
        other => panic!("expected InvalidConfiguration, got {:?}", other.map(|_| ())),
    }

    // both endpoints
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let socket = TcpStream::connect(addr).unwrap();
    let peer = FullAeAddr::new("ANY-SCP", addr.to_string());
    match Association::new(&ae, Some(socket), Some(peer)) {
        Err(Error::InvalidConfiguration) => {}
        other => panic!("expected InvalidConfiguration, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn local_abort_reaches_the_peer_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_monitor = Arc::new(CountingMonitor::default());
    let scp_ae = verification_scp_ae(Arc::clone(&scp_monitor));

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_ae = verification_scu_ae(Arc::new(CountingMonitor::default()));
    let assoc = request_to(&scu_ae, addr, "THIS-SCP");
    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));

    assoc.abort();
    assert_eq!(assoc.state(), AssociationState::Aborted);

    // aborting and releasing afterwards have no further effect
    assoc.abort();
    assoc.release().unwrap();
    assert_eq!(assoc.state(), AssociationState::Aborted);

    let scp_state = server.join().unwrap();
    assert_eq!(scp_state, AssociationState::Aborted);
    assert_eq!(scp_monitor.aborted.load(Ordering::SeqCst), 1);
    assert_eq!(
        *scp_monitor.last_abort.lock().unwrap(),
        Some(AbortRQSource::ServiceUser)
    );
}

/// A query handler answering two pending matches and then success.
struct StaticFindScp;

impl ServiceClassScp for StaticFindScp {
    fn scp(&self, ctx: &mut ServiceContext<'_>, message: DimseMessage) -> super::Result<()> {
        assert_eq!(
            message.command_field().unwrap(),
            CommandField::C_FIND_RQ as u16
        );
        let message_id = message.message_id().unwrap();
        let sop_class_uid = message.affected_sop_class_uid().unwrap();
        let ts = TransferSyntaxRegistry
            .get(ctx.transfer_syntax())
            .expect("negotiated transfer syntax should be supported");

        for name in ["DOE^JOHN", "ROE^JANE"] {
            let identifier = InMemDicomObject::from_element_iter([DataElement::new(
                tags::PATIENT_NAME,
                VR::PN,
                PrimitiveValue::from(name),
            )]);
            let mut data = Vec::new();
            identifier.write_dataset_with_ts(&mut data, ts).unwrap();
            ctx.send_message(
                &commands::c_find_rsp(message_id, &sop_class_uid, status::PENDING, true),
                Some(data),
            )?;
        }
        ctx.send_message(
            &commands::c_find_rsp(message_id, &sop_class_uid, status::SUCCESS, false),
            None,
        )
    }
}

#[test]
fn c_find_streams_matches_until_terminal_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let scp_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("QUERY-SCP")
            .with_scp_offer(PresentationContextOffer::new(
                uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .with_scp_handler(
                uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
                Arc::new(StaticFindScp),
            )
            .build(),
    );

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let assoc = Association::accept(&scp_ae, stream).unwrap();
        assoc.wait_terminated(TERMINATE_TIMEOUT)
    });

    let scu_ae = Arc::new(
        ApplicationEntity::builder()
            .ae_title("FIND-SCU")
            .with_scu_context(PresentationContext::new(
                1,
                uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
                vec![IMPLICIT_VR_LE.to_string()],
            ))
            .build(),
    );
    let assoc = request_to(&scu_ae, addr, "QUERY-SCP");
    assert!(assoc.wait_established(ESTABLISH_TIMEOUT));

    let query = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            PrimitiveValue::from("STUDY"),
        ),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("")),
    ]);

    let responses: Vec<_> = assoc
        .send_c_find(&query, 1, Priority::Low, crate::association::scu::QueryModel::StudyRoot)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(responses.len(), 3);
    assert!(responses[0].is_pending());
    assert!(responses[1].is_pending());
    assert_eq!(responses[2].status, status::SUCCESS);
    assert!(responses[2].dataset.is_none());

    let names: Vec<String> = responses[..2]
        .iter()
        .map(|response| {
            response
                .dataset
                .as_ref()
                .unwrap()
                .element(tags::PATIENT_NAME)
                .unwrap()
                .to_str()
                .unwrap()
                .trim()
                .to_string()
        })
        .collect();
    assert_eq!(names, vec!["DOE^JOHN".to_string(), "ROE^JANE".to_string()]);

    assoc.release().unwrap();
    server.join().unwrap();
}

#[test]
fn unknown_query_model_code_is_rejected() {
    match crate::association::scu::QueryModel::from_char('X') {
        Err(Error::UnknownQueryModel { model }) => assert_eq!(model, 'X'),
        other => panic!("expected UnknownQueryModel, got {:?}", other.map(|_| ())),
    }
    assert_eq!(
        crate::association::scu::QueryModel::from_char('p').unwrap(),
        crate::association::scu::QueryModel::PatientRoot
    );
}

#[test]
fn n_services_are_unimplemented() {
    use matches::assert_matches;

    let scu_ae = verification_scu_ae(Arc::new(CountingMonitor::default()));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let assoc = request_to(&scu_ae, addr, "NOBODY");

    assert_matches!(assoc.send_n_get(), Err(Error::Unimplemented));
    assert_matches!(assoc.send_n_set(), Err(Error::Unimplemented));
    assert_matches!(assoc.send_n_action(), Err(Error::Unimplemented));
    assert_matches!(assoc.send_n_create(), Err(Error::Unimplemented));
    assert_matches!(assoc.send_n_delete(), Err(Error::Unimplemented));
}
