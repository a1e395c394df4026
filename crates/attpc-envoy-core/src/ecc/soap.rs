//! SOAP envelopes for the GetECCServer protocol.

use super::envoy::{EccOperationResponse, EccStatusResponse};
use super::operation::EccOperation;
use crate::error::EnvoyError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// The SOAP protocol header for ECC
pub const ECC_SOAP_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <SOAP-ENV:Envelope
    xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:SOAP-ENC="http://schemas.xmlsoap.org/soap/encoding/"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns="urn:ecc">
    <SOAP-ENV:Body>
"#;

pub const ECC_SOAP_FOOTER: &str = r#"
    </SOAP-ENV:Body>
    </SOAP-ENV:Envelope>
"#;

const ERROR_CODE: &str = "ErrorCode";
const ERROR_MESSAGE: &str = "ErrorMessage";
const TEXT: &str = "Text";
const STATE: &str = "State";
const TRANSITION: &str = "Transition";

pub fn compose_status_request() -> String {
    format!("{ECC_SOAP_HEADER}<GetState>\n</GetState>\n{ECC_SOAP_FOOTER}")
}

pub fn compose_transition_request(op: EccOperation, config: &str, link: &str) -> String {
    format!("{ECC_SOAP_HEADER}<{op}>\n{config}{link}</{op}>\n{ECC_SOAP_FOOTER}")
}

/// Parse the reply to a transition request
pub fn parse_operation_response(text: &str) -> Result<EccOperationResponse, EnvoyError> {
    let mut fields = collect_elements(text, &[ERROR_CODE, ERROR_MESSAGE, TEXT])?;
    Ok(EccOperationResponse {
        error_code: required(&fields, ERROR_CODE)?.trim().parse()?,
        error_message: fields.remove(ERROR_MESSAGE).unwrap_or_default(),
        text: fields.remove(TEXT).unwrap_or_default(),
    })
}

/// Parse the reply to a GetState request
pub fn parse_status_response(text: &str) -> Result<EccStatusResponse, EnvoyError> {
    let mut fields = collect_elements(text, &[ERROR_CODE, ERROR_MESSAGE, STATE, TRANSITION])?;
    Ok(EccStatusResponse {
        error_code: required(&fields, ERROR_CODE)?.trim().parse()?,
        error_message: fields.remove(ERROR_MESSAGE).unwrap_or_default(),
        state: required(&fields, STATE)?.trim().parse()?,
        transition: required(&fields, TRANSITION)?.trim().parse()?,
    })
}

fn required<'a>(
    fields: &'a HashMap<&'static str, String>,
    name: &'static str,
) -> Result<&'a str, EnvoyError> {
    fields
        .get(name)
        .map(|s| s.as_str())
        .ok_or(EnvoyError::MissingXmlField(name))
}

/// Gather the text of the wanted elements, matched on local name so that
/// namespace prefixes used by the server do not matter. The first occurrence
/// of each element wins.
fn collect_elements(
    text: &str,
    wanted: &[&'static str],
) -> Result<HashMap<&'static str, String>, EnvoyError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut fields: HashMap<&'static str, String> = HashMap::new();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name();
                current = wanted
                    .iter()
                    .copied()
                    .find(|w| w.as_bytes() == local.as_ref())
                    .filter(|w| !fields.contains_key(w));
                if let Some(name) = current {
                    fields.insert(name, String::new());
                }
            }
            Event::Empty(e) => {
                let local = e.local_name();
                if let Some(name) = wanted.iter().copied().find(|w| w.as_bytes() == local.as_ref()) {
                    fields.entry(name).or_default();
                }
            }
            Event::Text(t) => {
                if let Some(name) = current {
                    let value = t.unescape()?;
                    if let Some(entry) = fields.get_mut(name) {
                        entry.push_str(&value);
                    }
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns="urn:ecc">
<SOAP-ENV:Body>{inner}</SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#
        )
    }

    #[test]
    fn test_parse_status_response() {
        let body = wrap(
            "<ns:GetStateResponse><ErrorCode>0</ErrorCode><ErrorMessage></ErrorMessage>\
             <State>4</State><Transition>0</Transition></ns:GetStateResponse>",
        );
        let parsed = parse_status_response(&body).unwrap();
        assert_eq!(parsed.error_code, 0);
        assert_eq!(parsed.error_message, "");
        assert_eq!(parsed.state, 4);
        assert_eq!(parsed.transition, 0);
    }

    #[test]
    fn test_parse_status_with_empty_message_element() {
        let body = wrap(
            "<ns:GetStateResponse><ErrorCode>0</ErrorCode><ErrorMessage/>\
             <State>1</State><Transition>0</Transition></ns:GetStateResponse>",
        );
        let parsed = parse_status_response(&body).unwrap();
        assert_eq!(parsed.state, 1);
    }

    #[test]
    fn test_parse_operation_response_with_error() {
        let body = wrap(
            "<ns:DescribeResponse><ErrorCode>3</ErrorCode>\
             <ErrorMessage>Could not find cobo3</ErrorMessage><Text>failed</Text>\
             </ns:DescribeResponse>",
        );
        let parsed = parse_operation_response(&body).unwrap();
        assert_eq!(parsed.error_code, 3);
        assert_eq!(parsed.error_message, "Could not find cobo3");
        assert_eq!(parsed.text, "failed");
    }

    #[test]
    fn test_missing_state_is_an_error() {
        let body = wrap("<ns:GetStateResponse><ErrorCode>0</ErrorCode></ns:GetStateResponse>");
        match parse_status_response(&body) {
            Err(EnvoyError::MissingXmlField(name)) => assert_eq!(name, "State"),
            other => panic!("expected missing field, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_code_is_an_error() {
        let body = wrap("<ns:R><ErrorCode>zero</ErrorCode><Text/></ns:R>");
        assert!(matches!(
            parse_operation_response(&body),
            Err(EnvoyError::InvalidStringToInt(_))
        ));
    }

    #[test]
    fn test_transition_request_wraps_operation() {
        let request = compose_transition_request(EccOperation::Prepare, "<c/>", "<l/>");
        assert!(request.starts_with(ECC_SOAP_HEADER));
        assert!(request.contains("<Prepare>\n<c/><l/></Prepare>"));
        assert!(request.ends_with(ECC_SOAP_FOOTER));
    }

    #[test]
    fn test_status_request() {
        assert!(compose_status_request().contains("<GetState>"));
    }
}
