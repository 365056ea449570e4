//! XEP-0054: vcard-temp
//!
//! A user's profile information (full name, nickname, email, photo) stored
//! and served as a `jabber:client` IQ payload. Mirrors the get/set/result
//! shape of [`crate::xep::xep0049`]: a `get` with no stored vCard returns an
//! empty element rather than an error, and a `set` simply replaces whatever
//! was stored before.

use minidom::Element;
use xmpp_parsers::iq::Iq;

/// Namespace for vcard-temp.
pub const NS_VCARD: &str = "vcard-temp";

/// A user's vCard, trimmed to the fields this server round-trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    pub full_name: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub photo: Option<VCardPhoto>,
}

/// Inline photo data (`<PHOTO><TYPE/><BINVAL/></PHOTO>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VCardPhoto {
    pub mime_type: String,
    /// Base64-encoded image bytes, as carried on the wire.
    pub binval: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VCardError {
    BadRequest(String),
    InternalError(String),
}

impl std::fmt::Display for VCardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VCardError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            VCardError::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for VCardError {}

/// Whether an IQ carries a vcard-temp `<vCard/>` payload (get or set).
pub fn is_vcard_query(iq: &Iq) -> bool {
    is_vcard_get(iq) || is_vcard_set(iq)
}

pub fn is_vcard_get(iq: &Iq) -> bool {
    matches!(&iq.payload, xmpp_parsers::iq::IqType::Get(elem) if elem.name() == "vCard" && elem.ns() == NS_VCARD)
}

pub fn is_vcard_set(iq: &Iq) -> bool {
    matches!(&iq.payload, xmpp_parsers::iq::IqType::Set(elem) if elem.name() == "vCard" && elem.ns() == NS_VCARD)
}

/// Parse the `<vCard/>` payload of a get/set IQ.
pub fn parse_vcard_from_iq(iq: &Iq) -> Result<VCard, VCardError> {
    let elem = match &iq.payload {
        xmpp_parsers::iq::IqType::Get(elem) | xmpp_parsers::iq::IqType::Set(elem) => elem,
        _ => return Err(VCardError::BadRequest("vCard must be IQ get or set".to_string())),
    };
    parse_vcard_element(elem)
}

/// Parse a `<vCard/>` element directly.
pub fn parse_vcard_element(elem: &Element) -> Result<VCard, VCardError> {
    if elem.name() != "vCard" || elem.ns() != NS_VCARD {
        return Err(VCardError::BadRequest("Expected vCard element".to_string()));
    }

    let full_name = elem.get_child("FN", NS_VCARD).map(|e| e.text()).filter(|s| !s.is_empty());
    let nickname = elem.get_child("NICKNAME", NS_VCARD).map(|e| e.text()).filter(|s| !s.is_empty());
    let email = elem
        .get_child("EMAIL", NS_VCARD)
        .and_then(|e| e.get_child("USERID", NS_VCARD))
        .map(|e| e.text())
        .filter(|s| !s.is_empty());

    let photo = elem.get_child("PHOTO", NS_VCARD).and_then(|photo_elem| {
        let mime_type = photo_elem.get_child("TYPE", NS_VCARD).map(|e| e.text())?;
        let binval = photo_elem.get_child("BINVAL", NS_VCARD).map(|e| e.text())?;
        if binval.is_empty() {
            None
        } else {
            Some(VCardPhoto { mime_type, binval })
        }
    });

    Ok(VCard { full_name, nickname, email, photo })
}

/// Build the `<vCard/>` element for a [`VCard`].
pub fn build_vcard_element(vcard: &VCard) -> Element {
    let mut builder = Element::builder("vCard", NS_VCARD);

    if let Some(ref fullname) = vcard.full_name {
        builder = builder.append(Element::builder("FN", NS_VCARD).append(fullname.as_str()).build());
    }
    if let Some(ref nickname) = vcard.nickname {
        builder = builder.append(Element::builder("NICKNAME", NS_VCARD).append(nickname.as_str()).build());
    }
    if let Some(ref email) = vcard.email {
        let userid = Element::builder("USERID", NS_VCARD).append(email.as_str()).build();
        builder = builder.append(Element::builder("EMAIL", NS_VCARD).append(userid).build());
    }
    if let Some(ref photo) = vcard.photo {
        let type_elem = Element::builder("TYPE", NS_VCARD).append(photo.mime_type.as_str()).build();
        let binval_elem = Element::builder("BINVAL", NS_VCARD).append(photo.binval.as_str()).build();
        builder = builder.append(
            Element::builder("PHOTO", NS_VCARD)
                .append(type_elem)
                .append(binval_elem)
                .build(),
        );
    }

    builder.build()
}

/// Build a vCard result IQ (response to `get`).
pub fn build_vcard_response(original_iq: &Iq, vcard: &VCard) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: xmpp_parsers::iq::IqType::Result(Some(build_vcard_element(vcard))),
    }
}

/// Build an empty vCard result, for a `get` when no vCard is stored.
pub fn build_empty_vcard_response(original_iq: &Iq) -> Iq {
    build_vcard_response(original_iq, &VCard::default())
}

/// Build a success result for a `set` (no payload).
pub fn build_vcard_success(original_iq: &Iq) -> Iq {
    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: xmpp_parsers::iq::IqType::Result(None),
    }
}

/// Build an error result IQ for a malformed vCard request.
pub fn build_vcard_error(original_iq: &Iq, error: &VCardError) -> Iq {
    let (error_type, condition) = match error {
        VCardError::BadRequest(_) => ("modify", "bad-request"),
        VCardError::InternalError(_) => ("wait", "internal-server-error"),
    };

    let error_elem = Element::builder("error", "jabber:client")
        .attr("type", error_type)
        .append(Element::builder(condition, "urn:ietf:params:xml:ns:xmpp-stanzas").build())
        .build();

    Iq {
        from: original_iq.to.clone(),
        to: original_iq.from.clone(),
        id: original_iq.id.clone(),
        payload: xmpp_parsers::iq::IqType::Error(error_elem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_iq(elem: Element) -> Iq {
        Iq {
            from: Some("alice@example.com/phone".parse().unwrap()),
            to: None,
            id: "vc1".to_string(),
            payload: xmpp_parsers::iq::IqType::Get(elem),
        }
    }

    #[test]
    fn recognizes_vcard_get_and_set() {
        let empty = Element::builder("vCard", NS_VCARD).build();
        assert!(is_vcard_get(&get_iq(empty.clone())));
        assert!(is_vcard_query(&get_iq(empty)));
    }

    #[test]
    fn rejects_wrong_namespace() {
        let elem = Element::builder("vCard", "some:other:ns").build();
        assert!(!is_vcard_get(&get_iq(elem)));
    }

    #[test]
    fn round_trips_basic_fields() {
        let vcard = VCard {
            full_name: Some("Alice Example".to_string()),
            nickname: Some("ali".to_string()),
            email: Some("alice@example.com".to_string()),
            photo: None,
        };
        let elem = build_vcard_element(&vcard);
        let parsed = parse_vcard_element(&elem).unwrap();
        assert_eq!(parsed, vcard);
    }

    #[test]
    fn round_trips_photo() {
        let vcard = VCard {
            full_name: None,
            nickname: None,
            email: None,
            photo: Some(VCardPhoto {
                mime_type: "image/png".to_string(),
                binval: "QUJD".to_string(),
            }),
        };
        let elem = build_vcard_element(&vcard);
        let parsed = parse_vcard_element(&elem).unwrap();
        assert_eq!(parsed, vcard);
    }

    #[test]
    fn empty_response_carries_empty_vcard() {
        let iq = get_iq(Element::builder("vCard", NS_VCARD).build());
        let response = build_empty_vcard_response(&iq);
        assert!(matches!(response.payload, xmpp_parsers::iq::IqType::Result(Some(_))));
    }

    #[test]
    fn set_success_has_no_payload() {
        let iq = get_iq(Element::builder("vCard", NS_VCARD).build());
        let response = build_vcard_success(&iq);
        assert!(matches!(response.payload, xmpp_parsers::iq::IqType::Result(None)));
    }

    #[test]
    fn error_response_carries_condition() {
        let iq = get_iq(Element::builder("vCard", NS_VCARD).build());
        let response = build_vcard_error(&iq, &VCardError::BadRequest("malformed".to_string()));
        match response.payload {
            xmpp_parsers::iq::IqType::Error(elem) => {
                assert!(elem.get_child("bad-request", "urn:ietf:params:xml:ns:xmpp-stanzas").is_some());
            }
            _ => panic!("expected error payload"),
        }
    }
}
