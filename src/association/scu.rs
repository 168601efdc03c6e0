//! SCU request helpers.
//!
//! These methods bridge application inputs to the DIMSE layer
//! of an established association:
//! they select the SOP class for the requested service,
//! locate a matching accepted presentation context,
//! encode the request and surface the peer's status codes.
//!
//! C-FIND, C-MOVE and C-GET return finite lazy sequences of
//! responses which terminate after the first non-pending status;
//! they are not restartable.

use dicom_dictionary_std::{tags, uids};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::association::negotiation::PresentationContextNegotiated;
use crate::association::scp;
use crate::association::{
    Association, DimseSnafu, EncodeDataSetSnafu, Error, NoMatchingContextSnafu,
    NotEstablishedSnafu, Result, UnimplementedSnafu, UnknownQueryModelSnafu,
    UnsupportedTransferSyntaxSnafu,
};
use crate::dimse::commands::{self, status, CommandField, Priority};
use crate::dimse::{DimseMessage, DimseProvider};

/// The query/retrieve information model driving
/// a C-FIND, C-MOVE or C-GET request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryModel {
    /// modality worklist (`W`); find and get only
    Worklist,
    /// patient root (`P`)
    PatientRoot,
    /// study root (`S`)
    StudyRoot,
    /// patient/study only (`O`)
    PatientStudyOnly,
}

impl QueryModel {
    /// Interpret the single-letter query model code.
    pub fn from_char(model: char) -> Result<Self> {
        match model.to_ascii_uppercase() {
            'W' => Ok(QueryModel::Worklist),
            'P' => Ok(QueryModel::PatientRoot),
            'S' => Ok(QueryModel::StudyRoot),
            'O' => Ok(QueryModel::PatientStudyOnly),
            _ => UnknownQueryModelSnafu { model }.fail(),
        }
    }

    // the patient/study-only model is retired but remains
    // part of the query model surface
    #[allow(deprecated)]
    fn find_sop_class(self) -> &'static str {
        match self {
            QueryModel::Worklist => uids::MODALITY_WORKLIST_INFORMATION_MODEL_FIND,
            QueryModel::PatientRoot => uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            QueryModel::StudyRoot => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            QueryModel::PatientStudyOnly => {
                uids::PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_FIND
            }
        }
    }

    #[allow(deprecated)]
    fn move_sop_class(self) -> Result<&'static str> {
        match self {
            QueryModel::Worklist => UnknownQueryModelSnafu { model: 'W' }.fail(),
            QueryModel::PatientRoot => {
                Ok(uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE)
            }
            QueryModel::StudyRoot => Ok(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE),
            QueryModel::PatientStudyOnly => {
                Ok(uids::PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE)
            }
        }
    }

    #[allow(deprecated)]
    fn get_sop_class(self) -> &'static str {
        match self {
            // the worklist information model has no GET variant;
            // worklist retrieval negotiates the FIND model
            QueryModel::Worklist => uids::MODALITY_WORKLIST_INFORMATION_MODEL_FIND,
            QueryModel::PatientRoot => uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
            QueryModel::StudyRoot => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
            QueryModel::PatientStudyOnly => {
                uids::PATIENT_STUDY_ONLY_QUERY_RETRIEVE_INFORMATION_MODEL_GET
            }
        }
    }
}

/// One response of a C-FIND, C-MOVE or C-GET exchange.
#[derive(Debug)]
pub struct ServiceResponse {
    /// the DIMSE status code of this response
    pub status: u16,
    /// the identifier data set accompanying the response, if any
    pub dataset: Option<InMemDicomObject>,
    pub sub_operations_remaining: Option<u16>,
    pub sub_operations_completed: Option<u16>,
    pub sub_operations_failed: Option<u16>,
    pub sub_operations_warning: Option<u16>,
}

impl ServiceResponse {
    /// Whether more responses are to follow.
    pub fn is_pending(&self) -> bool {
        status::is_pending(self.status)
    }
}

fn build_response(message: &DimseMessage, transfer_syntax_uid: &str) -> Result<ServiceResponse> {
    let status = message.status().context(DimseSnafu)?;
    let dataset = match &message.data {
        Some(bytes) => {
            let ts = TransferSyntaxRegistry
                .get(transfer_syntax_uid)
                .context(UnsupportedTransferSyntaxSnafu {
                    uid: transfer_syntax_uid,
                })?;
            Some(
                InMemDicomObject::read_dataset_with_ts(bytes.as_slice(), ts)
                    .context(crate::association::DecodeDataSetSnafu)?,
            )
        }
        None => None,
    };
    Ok(ServiceResponse {
        status,
        dataset,
        sub_operations_remaining: message.sub_operations_remaining(),
        sub_operations_completed: message.sub_operations_completed(),
        sub_operations_failed: message.sub_operations_failed(),
        sub_operations_warning: message.sub_operations_warning(),
    })
}

/// The shared mechanics of the lazy response sequences.
struct ResponseStream<'a> {
    assoc: &'a Association,
    dimse: DimseProvider,
    transfer_syntax_uid: String,
    finished: bool,
}

impl ResponseStream<'_> {
    fn next_response(&mut self) -> Option<Result<ServiceResponse>> {
        if self.finished {
            return None;
        }
        match self.dimse.receive(true) {
            Ok(Some(message)) => {
                let response = match build_response(&message, &self.transfer_syntax_uid) {
                    Ok(response) => response,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                };
                if !response.is_pending() {
                    self.finished = true;
                }
                Some(Ok(response))
            }
            Ok(None) => {
                debug!("DIMSE receive timed out, ending the response sequence");
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(Error::Dimse { source: e }))
            }
        }
    }
}

/// The lazy sequence of C-FIND responses.
pub struct CFindResponses<'a> {
    stream: ResponseStream<'a>,
}

impl Iterator for CFindResponses<'_> {
    type Item = Result<ServiceResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next_response()
    }
}

/// The lazy sequence of C-MOVE progress responses.
pub struct CMoveResponses<'a> {
    stream: ResponseStream<'a>,
}

impl Iterator for CMoveResponses<'_> {
    type Item = Result<ServiceResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next_response()
    }
}

/// The lazy sequence of C-GET progress responses.
///
/// Incoming C-STORE sub-operations are answered on the fly
/// through the service class handlers registered on the AE,
/// without surfacing in the sequence.
pub struct CGetResponses<'a> {
    stream: ResponseStream<'a>,
}

impl Iterator for CGetResponses<'_> {
    type Item = Result<ServiceResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stream.finished {
                return None;
            }
            // peek at store sub-operations before yielding responses
            match self.stream.dimse.receive(true) {
                Ok(Some(message)) => {
                    if message.command_field().ok() == Some(CommandField::C_STORE_RQ as u16) {
                        // nested acceptor role on the same association
                        let inner = self.stream.assoc.inner();
                        if let (Some(session), Some(parameters)) =
                            (inner.session(), inner.parameters())
                        {
                            let peer_ae_title = inner.peer_ae_title().unwrap_or_default();
                            scp::dispatch_message(
                                inner.ae(),
                                &session,
                                parameters,
                                &peer_ae_title,
                                message,
                            );
                        }
                        continue;
                    }
                    let response = match build_response(&message, &self.stream.transfer_syntax_uid)
                    {
                        Ok(response) => response,
                        Err(e) => {
                            self.stream.finished = true;
                            return Some(Err(e));
                        }
                    };
                    if !response.is_pending() {
                        self.stream.finished = true;
                    }
                    return Some(Ok(response));
                }
                Ok(None) => {
                    debug!("DIMSE receive timed out, ending the response sequence");
                    self.stream.finished = true;
                    return None;
                }
                Err(e) => {
                    self.stream.finished = true;
                    return Some(Err(Error::Dimse { source: e }));
                }
            }
        }
    }
}

impl Association {
    /// Select an accepted presentation context for the SOP class
    /// and set up the DIMSE view, refusing when not established.
    fn scu_context(
        &self,
        sop_class_uid: &str,
    ) -> Result<(PresentationContextNegotiated, DimseProvider)> {
        ensure!(self.inner().is_established(), NotEstablishedSnafu);
        let parameters = self.inner().parameters().context(NotEstablishedSnafu)?;
        let context = parameters
            .accepted_contexts()
            .find(|pc| pc.abstract_syntax == sop_class_uid)
            .cloned()
            .context(NoMatchingContextSnafu { sop_class_uid })?;
        let dimse = self.inner().dimse().context(NotEstablishedSnafu)?;
        Ok((context, dimse))
    }

    fn context_transfer_syntax(context: &PresentationContextNegotiated) -> String {
        context
            .transfer_syntax
            .clone()
            .unwrap_or_else(|| "1.2.840.10008.1.2".to_string())
    }

    /// Send a C-ECHO request to the peer AE.
    ///
    /// Returns the response status (success is 0x0000),
    /// or `None` if the DIMSE exchange timed out.
    pub fn send_c_echo(&self, message_id: u16) -> Result<Option<u16>> {
        let (context, dimse) = self.scu_context(uids::VERIFICATION)?;
        let command = commands::c_echo_rq(message_id, uids::VERIFICATION);
        dimse.send(&command, None, context.id).context(DimseSnafu)?;
        match dimse.receive(true).context(DimseSnafu)? {
            Some(message) => Ok(Some(message.status().context(DimseSnafu)?)),
            None => Ok(None),
        }
    }

    /// Send a C-STORE request carrying the given data set.
    ///
    /// The presentation context is selected by the data set's
    /// SOP class UID, and the data set is encoded under the
    /// transfer syntax negotiated for that context.
    /// Encoding failures surface as a cannot-understand status
    /// without emitting any DIMSE traffic.
    /// Returns `None` if the DIMSE exchange timed out.
    pub fn send_c_store(
        &self,
        dataset: &InMemDicomObject,
        message_id: u16,
        priority: Priority,
    ) -> Result<Option<u16>> {
        ensure!(self.inner().is_established(), NotEstablishedSnafu);

        let sop_class_uid = match dataset
            .get(tags::SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
        {
            Some(uid) => uid
                .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
                .to_string(),
            None => {
                warn!("Data set has no SOP class UID");
                return Ok(Some(status::CANNOT_UNDERSTAND));
            }
        };

        let (context, dimse) = self.scu_context(&sop_class_uid)?;
        let transfer_syntax_uid = Self::context_transfer_syntax(&context);

        let ts = match TransferSyntaxRegistry.get(&transfer_syntax_uid) {
            Some(ts) => ts,
            None => {
                warn!(
                    "Negotiated transfer syntax `{}` is not supported",
                    transfer_syntax_uid
                );
                return Ok(Some(status::CANNOT_UNDERSTAND));
            }
        };

        let mut data = Vec::new();
        if let Err(e) = dataset.write_dataset_with_ts(&mut data, ts) {
            warn!("Could not encode data set for storage: {}", e);
            return Ok(Some(status::CANNOT_UNDERSTAND));
        }

        let sop_instance_uid = dataset
            .get(tags::SOP_INSTANCE_UID)
            .and_then(|e| e.to_str().ok())
            .map(|uid| {
                uid.trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
                    .to_string()
            })
            .unwrap_or_default();

        let command = commands::c_store_rq(message_id, &sop_class_uid, &sop_instance_uid, priority);
        dimse
            .send(&command, Some(data), context.id)
            .context(DimseSnafu)?;

        match dimse.receive(true).context(DimseSnafu)? {
            Some(message) => Ok(Some(message.status().context(DimseSnafu)?)),
            None => Ok(None),
        }
    }

    /// Send a C-FIND request and stream the matches.
    pub fn send_c_find(
        &self,
        query: &InMemDicomObject,
        message_id: u16,
        priority: Priority,
        query_model: QueryModel,
    ) -> Result<CFindResponses<'_>> {
        let sop_class_uid = query_model.find_sop_class();
        let (context, dimse) = self.scu_context(sop_class_uid)?;
        let transfer_syntax_uid = Self::context_transfer_syntax(&context);
        let data = encode_query(query, &transfer_syntax_uid)?;
        let command = commands::c_find_rq(message_id, sop_class_uid, priority);
        dimse
            .send(&command, Some(data), context.id)
            .context(DimseSnafu)?;
        Ok(CFindResponses {
            stream: ResponseStream {
                assoc: self,
                dimse,
                transfer_syntax_uid,
                finished: false,
            },
        })
    }

    /// Send a C-MOVE request directing the retrieved instances
    /// to `move_destination_aet`, and stream the progress.
    pub fn send_c_move(
        &self,
        query: &InMemDicomObject,
        move_destination_aet: &str,
        message_id: u16,
        priority: Priority,
        query_model: QueryModel,
    ) -> Result<CMoveResponses<'_>> {
        let sop_class_uid = query_model.move_sop_class()?;
        let (context, dimse) = self.scu_context(sop_class_uid)?;
        let transfer_syntax_uid = Self::context_transfer_syntax(&context);
        let data = encode_query(query, &transfer_syntax_uid)?;
        let command =
            commands::c_move_rq(message_id, sop_class_uid, priority, move_destination_aet);
        dimse
            .send(&command, Some(data), context.id)
            .context(DimseSnafu)?;
        Ok(CMoveResponses {
            stream: ResponseStream {
                assoc: self,
                dimse,
                transfer_syntax_uid,
                finished: false,
            },
        })
    }

    /// Send a C-GET request and stream the progress.
    ///
    /// The retrieved instances arrive as C-STORE sub-operations
    /// on this same association; register a storage handler
    /// on the AE and propose the storage contexts
    /// with the SCP role selected to receive them.
    pub fn send_c_get(
        &self,
        query: &InMemDicomObject,
        message_id: u16,
        priority: Priority,
        query_model: QueryModel,
    ) -> Result<CGetResponses<'_>> {
        let sop_class_uid = query_model.get_sop_class();
        let (context, dimse) = self.scu_context(sop_class_uid)?;
        let transfer_syntax_uid = Self::context_transfer_syntax(&context);
        let data = encode_query(query, &transfer_syntax_uid)?;
        let command = commands::c_get_rq(message_id, sop_class_uid, priority);
        dimse
            .send(&command, Some(data), context.id)
            .context(DimseSnafu)?;
        Ok(CGetResponses {
            stream: ResponseStream {
                assoc: self,
                dimse,
                transfer_syntax_uid,
                finished: false,
            },
        })
    }

    /// Not implemented.
    pub fn send_n_get(&self) -> Result<()> {
        UnimplementedSnafu.fail()
    }

    /// Not implemented.
    pub fn send_n_set(&self) -> Result<()> {
        UnimplementedSnafu.fail()
    }

    /// Not implemented.
    pub fn send_n_action(&self) -> Result<()> {
        UnimplementedSnafu.fail()
    }

    /// Not implemented.
    pub fn send_n_create(&self) -> Result<()> {
        UnimplementedSnafu.fail()
    }

    /// Not implemented.
    pub fn send_n_delete(&self) -> Result<()> {
        UnimplementedSnafu.fail()
    }
}

fn encode_query(query: &InMemDicomObject, transfer_syntax_uid: &str) -> Result<Vec<u8>> {
    let ts = TransferSyntaxRegistry
        .get(transfer_syntax_uid)
        .context(UnsupportedTransferSyntaxSnafu {
            uid: transfer_syntax_uid,
        })?;
    let mut data = Vec::new();
    query
        .write_dataset_with_ts(&mut data, ts)
        .context(EncodeDataSetSnafu)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::QueryModel;
    use dicom_dictionary_std::uids;

    #[rstest]
    #[case('W', QueryModel::Worklist)]
    #[case('p', QueryModel::PatientRoot)]
    #[case('S', QueryModel::StudyRoot)]
    #[case('o', QueryModel::PatientStudyOnly)]
    fn query_model_codes(#[case] code: char, #[case] expected: QueryModel) {
        assert_eq!(QueryModel::from_char(code).unwrap(), expected);
    }

    #[test]
    fn query_models_resolve_to_sop_classes() {
        assert_eq!(
            QueryModel::StudyRoot.find_sop_class(),
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND
        );
        assert_eq!(
            QueryModel::PatientRoot.move_sop_class().unwrap(),
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE
        );
        assert_eq!(
            QueryModel::StudyRoot.get_sop_class(),
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET
        );
        // no worklist information model for retrieval with move
        assert!(QueryModel::Worklist.move_sop_class().is_err());
    }
}
