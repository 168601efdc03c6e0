//! PDU encoding module.

use std::io::Write;

use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ResultExt, Snafu};

use crate::pdu::*;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not write chunk of PDU `{}`", name))]
    WriteChunk {
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("could not write PDU field `{}`", field))]
    WriteField {
        field: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("could not write {} reserved bytes", bytes))]
    WriteReserved { bytes: u32, source: std::io::Error },

    #[snafu(display("could not encode text field `{}`", field))]
    EncodeField {
        field: &'static str,
        source: dicom_encoding::text::EncodeTextError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("failed to build chunk"))]
    BuildChunk {
        #[snafu(source(from(Error, Box::from)))]
        source: Box<Error>,
    },
    #[snafu(display("failed to write chunk length"))]
    WriteLength { source: std::io::Error },
    #[snafu(display("failed to write chunk data"))]
    WriteData { source: std::io::Error },
}

fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    let length = data.len() as u32;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).context(BuildChunkSnafu)?;

    let length = data.len() as u16;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Encode the AE title as 16 ISO 646 characters, space padded.
fn write_ae_title(
    writer: &mut dyn Write,
    codec: &dyn TextCodec,
    ae_title: &str,
    field: &'static str,
) -> Result<()> {
    let mut ae_title_bytes = codec.encode(ae_title).context(EncodeFieldSnafu { field })?;
    ae_title_bytes.truncate(16);
    ae_title_bytes.resize(16, b' ');
    writer.write_all(&ae_title_bytes).context(WriteFieldSnafu { field })
}

/// Encode a UID field, nul padded to an even number of octets.
fn write_uid(
    writer: &mut dyn Write,
    codec: &dyn TextCodec,
    uid: &str,
    field: &'static str,
) -> Result<()> {
    let mut uid_bytes = codec.encode(uid).context(EncodeFieldSnafu { field })?;
    if uid_bytes.len() % 2 != 0 {
        uid_bytes.push(b'\0');
    }
    writer.write_all(&uid_bytes).context(WriteFieldSnafu { field })
}

/// Encode a full PDU into the given writer.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let codec = DefaultCharacterSetCodec;
    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            // A-ASSOCIATE-RQ PDU Structure

            // 1 - PDU-type + 2 - Reserved
            writer
                .write_u8(0x01)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Protocol-version
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;

                // 9-10 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // 11-26 - Called-AE-title
                write_ae_title(writer, &codec, called_ae_title, "Called-AE-title")?;

                // 27-42 - Calling-AE-title
                write_ae_title(writer, &codec, calling_ae_title, "Calling-AE-title")?;

                // 43-74 - Reserved
                writer
                    .write_all(&[0; 32])
                    .context(WriteReservedSnafu { bytes: 32_u32 })?;

                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)?;

                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })?;

            Ok(())
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            // A-ASSOCIATE-AC PDU Structure

            // 1 - PDU-type + 2 - Reserved
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Protocol-version
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;

                // 9-10 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // 11-42 - AE title fields, echoed back from the RQ
                write_ae_title(writer, &codec, called_ae_title, "Called-AE-title")?;
                write_ae_title(writer, &codec, calling_ae_title, "Calling-AE-title")?;

                // 43-74 - Reserved
                writer
                    .write_all(&[0; 32])
                    .context(WriteReservedSnafu { bytes: 32_u32 })?;

                write_pdu_variable_application_context_name(
                    writer,
                    application_context_name,
                    &codec,
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)?;

                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })?;

            Ok(())
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            // A-ASSOCIATE-RJ PDU Structure

            writer
                .write_u8(0x03)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                // 7 - Reserved
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;

                // 8 - Result
                writer
                    .write_u8(result.code())
                    .context(WriteFieldSnafu { field: "Result" })?;

                // 9 - Source, 10 - Reason/Diag.
                let (source, reason) = source.as_parts();
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })?;

                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })?;

            Ok(())
        }
        Pdu::PData { data } => {
            // P-DATA-TF PDU Structure

            writer
                .write_u8(0x04)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                for value in data {
                    // 1-4 - Item-length (pc id + control header + data)
                    writer
                        .write_u32::<BigEndian>(value.data.len() as u32 + 2)
                        .context(WriteFieldSnafu {
                            field: "Item-length",
                        })?;

                    // 5 - Presentation-context-ID
                    writer
                        .write_u8(value.presentation_context_id)
                        .context(WriteFieldSnafu {
                            field: "Presentation-context-ID",
                        })?;

                    // 6 - Message control header
                    let mut message_header = 0x00;
                    if value.value_type == PDataValueType::Command {
                        message_header |= 0x01;
                    }
                    if value.is_last {
                        message_header |= 0x02;
                    }
                    writer.write_u8(message_header).context(WriteFieldSnafu {
                        field: "Message Control Header",
                    })?;

                    // 7-xxx - Presentation-data-value
                    writer.write_all(&value.data).context(WriteFieldSnafu {
                        field: "Presentation-data-value",
                    })?;
                }
                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })?;

            Ok(())
        }
        Pdu::ReleaseRQ => {
            writer
                .write_u8(0x05)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u32::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 4_u32 })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RQ",
            })?;
            Ok(())
        }
        Pdu::ReleaseRP => {
            writer
                .write_u8(0x06)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u32::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 4_u32 })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-RELEASE-RP",
            })?;
            Ok(())
        }
        Pdu::AbortRQ { source } => {
            writer
                .write_u8(0x07)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u32(writer, |writer| {
                // 7-8 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // 9 - Source, 10 - Reason/Diag
                let (source, reason) = source.as_parts();
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })?;
            Ok(())
        }
        Pdu::Unknown { pdu_type, data } => {
            writer
                .write_u8(*pdu_type)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(data)
                    .context(WriteFieldSnafu { field: "Unknown" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Unknown" })?;
            Ok(())
        }
    }
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
    codec: &dyn TextCodec,
) -> Result<()> {
    // Application Context Item

    // 1 - Item-type + 2 - Reserved
    writer
        .write_u8(0x10)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        write_uid(
            writer,
            codec,
            application_context_name,
            "Application-context-name",
        )
    })
    .context(WriteChunkSnafu {
        name: "Application Context Item",
    })?;

    Ok(())
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
    codec: &dyn TextCodec,
) -> Result<()> {
    // Presentation Context Item (proposed)

    // 1 - Item-type + 2 - Reserved
    writer
        .write_u8(0x20)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6-8 - Reserved
        writer
            .write_all(&[0; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        // Abstract Syntax sub-item
        writer
            .write_u8(0x30)
            .context(WriteFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        write_chunk_u16(writer, |writer| {
            write_uid(
                writer,
                codec,
                &presentation_context.abstract_syntax,
                "Abstract-syntax-name",
            )
        })
        .context(WriteChunkSnafu {
            name: "Abstract Syntax Sub-Item",
        })?;

        // Transfer Syntax sub-items
        for transfer_syntax in &presentation_context.transfer_syntaxes {
            writer
                .write_u8(0x40)
                .context(WriteFieldSnafu { field: "Item-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u16(writer, |writer| {
                write_uid(writer, codec, transfer_syntax, "Transfer-syntax-name")
            })
            .context(WriteChunkSnafu {
                name: "Transfer Syntax Sub-Item",
            })?;
        }

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })?;

    Ok(())
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
    codec: &dyn TextCodec,
) -> Result<()> {
    // Presentation Context Item (result)

    // 1 - Item-type + 2 - Reserved
    writer
        .write_u8(0x21)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 7 - Result/Reason
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;

        // 8 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // Transfer Syntax sub-item
        writer
            .write_u8(0x40)
            .context(WriteFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        write_chunk_u16(writer, |writer| {
            write_uid(
                writer,
                codec,
                &presentation_context.transfer_syntax,
                "Transfer-syntax-name",
            )
        })
        .context(WriteChunkSnafu {
            name: "Transfer Syntax Sub-Item",
        })?;

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })?;

    Ok(())
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
    codec: &dyn TextCodec,
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    // User Information Item

    // 1 - Item-type + 2 - Reserved
    writer
        .write_u8(0x50)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    // Maximum Length sub-item
                    writer
                        .write_u8(0x51)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WriteFieldSnafu {
                                field: "Maximum-length-received",
                            })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Maximum Length Sub-Item",
                    })?;
                }
                UserVariableItem::ImplementationClassUID(class_uid) => {
                    // Implementation Class UID sub-item
                    writer
                        .write_u8(0x52)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        write_uid(writer, codec, class_uid, "Implementation-class-uid")
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Class UID Sub-Item",
                    })?;
                }
                UserVariableItem::RoleSelection(role_selection) => {
                    // SCP/SCU Role Selection sub-item
                    writer
                        .write_u8(0x54)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        write_chunk_u16(writer, |writer| {
                            write_uid(writer, codec, &role_selection.sop_class_uid, "SOP-class-uid")
                        })
                        .context(WriteChunkSnafu {
                            name: "SOP Class UID",
                        })?;
                        writer
                            .write_u8(role_selection.scu_role as u8)
                            .context(WriteFieldSnafu { field: "SCU-role" })?;
                        writer
                            .write_u8(role_selection.scp_role as u8)
                            .context(WriteFieldSnafu { field: "SCP-role" })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "SCP/SCU Role Selection Sub-Item",
                    })?;
                }
                UserVariableItem::ImplementationVersionName(version_name) => {
                    // Implementation Version Name sub-item
                    writer
                        .write_u8(0x55)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        let version_name_bytes =
                            codec.encode(version_name).context(EncodeFieldSnafu {
                                field: "Implementation-version-name",
                            })?;
                        writer
                            .write_all(&version_name_bytes)
                            .context(WriteFieldSnafu {
                                field: "Implementation-version-name",
                            })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Version Name Sub-Item",
                    })?;
                }
                UserVariableItem::SopClassExtendedNegotiation(sop_class_uid, data) => {
                    // SOP Class Extended Negotiation sub-item
                    writer
                        .write_u8(0x56)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        write_chunk_u16(writer, |writer| {
                            write_uid(writer, codec, sop_class_uid, "SOP-class-uid")
                        })
                        .context(WriteChunkSnafu {
                            name: "SOP Class UID",
                        })?;
                        writer.write_all(data).context(WriteFieldSnafu {
                            field: "Service-class-application-information",
                        })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "SOP Class Extended Negotiation Sub-Item",
                    })?;
                }
                UserVariableItem::UserIdentityItem(user_identity) => {
                    // User Identity sub-item
                    writer
                        .write_u8(0x58)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u8(user_identity.identity_type.code())
                            .context(WriteFieldSnafu {
                                field: "User-Identity-type",
                            })?;
                        writer
                            .write_u8(user_identity.positive_response_requested as u8)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-positive-response-requested",
                            })?;
                        writer
                            .write_u16::<BigEndian>(user_identity.primary_field.len() as u16)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-primary-field-length",
                            })?;
                        writer
                            .write_all(&user_identity.primary_field)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-primary-field",
                            })?;
                        writer
                            .write_u16::<BigEndian>(user_identity.secondary_field.len() as u16)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-secondary-field-length",
                            })?;
                        writer
                            .write_all(&user_identity.secondary_field)
                            .context(WriteFieldSnafu {
                                field: "User-Identity-secondary-field",
                            })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "User Identity Sub-Item",
                    })?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    writer
                        .write_u8(*item_type)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(data)
                            .context(WriteFieldSnafu { field: "Unknown" })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Unknown Sub-Item",
                    })?;
                }
            }
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "User Information Item",
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::pdu::reader::read_pdu;
    use crate::pdu::MINIMUM_PDU_SIZE;

    fn roundtrip(pdu: &Pdu) -> Pdu {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu).expect("encoding should succeed");
        let mut buf = BytesMut::from(&bytes[..]);
        let decoded = read_pdu(&mut buf, MINIMUM_PDU_SIZE, true)
            .expect("decoding should succeed")
            .expect("a full PDU should be available");
        assert!(buf.is_empty(), "decoding should consume the whole frame");
        decoded
    }

    #[test]
    fn read_pdu_waits_for_full_frame() {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, &Pdu::ReleaseRQ).unwrap();

        let mut buf = BytesMut::from(&bytes[..bytes.len() - 1]);
        assert_eq!(read_pdu(&mut buf, MINIMUM_PDU_SIZE, true).unwrap(), None);

        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        assert_eq!(
            read_pdu(&mut buf, MINIMUM_PDU_SIZE, true).unwrap(),
            Some(Pdu::ReleaseRQ)
        );
    }

    #[test]
    fn roundtrip_association_rq_with_roles() {
        let pdu = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "GET-SCU".to_string(),
            called_ae_title: "MAIN-STORAGE".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![
                PresentationContextProposed {
                    id: 1,
                    abstract_syntax: "1.2.840.10008.1.1".to_string(),
                    transfer_syntaxes: vec![
                        "1.2.840.10008.1.2.1".to_string(),
                        "1.2.840.10008.1.2".to_string(),
                    ],
                },
                PresentationContextProposed {
                    id: 3,
                    abstract_syntax: "1.2.840.10008.5.1.4.1.2.2.3".to_string(),
                    transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
                },
            ],
            user_variables: vec![
                UserVariableItem::MaxLength(16384),
                UserVariableItem::ImplementationClassUID("1.2.345.6.7890.1.234".to_string()),
                UserVariableItem::ImplementationVersionName("ASSOC-TEST".to_string()),
                UserVariableItem::RoleSelection(RoleSelection {
                    sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                    scu_role: false,
                    scp_role: true,
                }),
            ],
        });

        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn roundtrip_association_ac() {
        let pdu = Pdu::AssociationAC(AssociationAC {
            protocol_version: 1,
            calling_ae_title: "FIND-SCU".to_string(),
            called_ae_title: "QUERY-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![
                PresentationContextResult {
                    id: 1,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
                PresentationContextResult {
                    id: 3,
                    reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
            ],
            user_variables: vec![UserVariableItem::MaxLength(0)],
        });

        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn roundtrip_association_rj() {
        let pdu = Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized,
            ),
        });
        assert_eq!(roundtrip(&pdu), pdu);

        let pdu = Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Transient,
            source: AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
            ),
        });
        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn roundtrip_abort_and_pdata() {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::ReasonNotSpecified,
            ),
        };
        assert_eq!(roundtrip(&pdu), pdu);

        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: (0..64).collect(),
            }],
        };
        assert_eq!(roundtrip(&pdu), pdu);
    }
}
