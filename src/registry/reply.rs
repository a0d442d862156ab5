//! What a target method hands back to the dispatcher.

use std::fmt;

use bytes::BufMut;
use quick_xml::escape::escape;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Content type written for [`XmlDocument`] replies.
pub const XML_CONTENT_TYPE: &str = "text/xml";

/// A value that can be encoded into JSON later, on the dispatcher's side
/// of the call.
pub trait EncodeJson: Send {
    fn encode(&self) -> serde_json::Result<Value>;
}

impl<T> EncodeJson for T
where
    T: Serialize + Send,
{
    fn encode(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// The result of a successful invocation.
pub enum Reply {
    /// Goes through the processor's serializer.
    Value(Box<dyn EncodeJson>),
    /// Written to the response as is, bypassing the serializer.
    Document(XmlDocument),
}

impl Reply {
    pub fn value<T>(value: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self::Value(Box::new(value))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Reply::Value(..)"),
            Self::Document(doc) => f.debug_tuple("Reply::Document").field(doc).finish(),
        }
    }
}

/// Conversion from a method's return type into a [`Reply`].
///
/// Implemented for plain data types, `serde_json::Value`, [`XmlDocument`],
/// and any `Serialize` type wrapped in [`Json`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

/// Marks a return value for JSON encoding.
///
/// ```
/// use remoting::registry::{IntoReply, Json, Reply};
///
/// #[derive(serde::Serialize)]
/// struct Point { x: i32, y: i32 }
///
/// assert!(matches!(Json(Point { x: 1, y: 2 }).into_reply(), Reply::Value(_)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> IntoReply for Json<T>
where
    T: Serialize + Send + 'static,
{
    fn into_reply(self) -> Reply {
        Reply::value(self.0)
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for XmlDocument {
    fn into_reply(self) -> Reply {
        Reply::Document(self)
    }
}

impl<T> IntoReply for Vec<T>
where
    T: Serialize + Send + 'static,
{
    fn into_reply(self) -> Reply {
        Reply::value(self)
    }
}

impl<T> IntoReply for Option<T>
where
    T: Serialize + Send + 'static,
{
    fn into_reply(self) -> Reply {
        Reply::value(self)
    }
}

macro_rules! plain_replies {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply {
                    Reply::value(self)
                }
            }
        )*
    };
}

plain_replies!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Value,
);

/// A structured XML document returned from a method.
///
/// ```
/// use remoting::registry::XmlDocument;
///
/// let doc = XmlDocument::element("greeting", "fish & chips").unwrap();
/// assert_eq!(
///     doc.to_xml(),
///     "<?xml version=\"1.0\" encoding=\"utf-8\"?><greeting>fish &amp; chips</greeting>"
/// );
///
/// assert!(XmlDocument::element("a></a><b", "t").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: String,
}

impl XmlDocument {
    /// Wraps already well-formed markup for the root element.
    pub fn new(root_markup: impl Into<String>) -> Self {
        Self {
            root: root_markup.into(),
        }
    }

    /// A document whose root element holds escaped text.
    ///
    /// `name` must be an XML `Name`.
    pub fn element(name: &str, text: &str) -> Result<Self, InvalidXmlName> {
        if !is_xml_name(name) {
            return Err(InvalidXmlName(name.to_owned()));
        }
        Ok(Self::new(format!("<{name}>{}</{name}>", escape(text))))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Writes the declaration and the root element to `out`.
    pub fn save(&self, out: &mut impl BufMut) {
        out.put_slice(br#"<?xml version="1.0" encoding="utf-8"?>"#);
        out.put_slice(self.root.as_bytes());
    }

    pub fn to_xml(&self) -> String {
        let mut out = Vec::with_capacity(self.root.len() + 40);
        self.save(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// An element name that is not an XML `Name`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0:?} is not a valid XML element name")]
pub struct InvalidXmlName(pub String);

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(reply: Reply) -> Value {
        match reply {
            Reply::Value(v) => v.encode().unwrap(),
            Reply::Document(_) => panic!("expected a value reply"),
        }
    }

    #[test]
    fn plain_values_encode() {
        assert_eq!(encoded(5_i64.into_reply()), serde_json::json!(5));
        assert_eq!(encoded(().into_reply()), Value::Null);
        assert_eq!(encoded(vec!["a", "b"].into_reply()), serde_json::json!(["a", "b"]));
        assert_eq!(encoded(None::<u8>.into_reply()), Value::Null);
    }

    #[test]
    fn documents_bypass_encoding() {
        let reply = XmlDocument::new("<a/>").into_reply();
        assert!(matches!(reply, Reply::Document(ref d) if d.root() == "<a/>"));
    }

    #[test]
    fn element_escapes_markup() {
        let doc = XmlDocument::element("q", "<b>\"x\"</b>").unwrap();
        assert_eq!(doc.root(), "<q>&lt;b&gt;&quot;x&quot;&lt;/b&gt;</q>");
    }

    #[test]
    fn element_rejects_names_that_break_out_of_the_tag() {
        for name in ["a></a><injected", "", "1st", "a b", "a/", "-x", "a&b"] {
            assert_eq!(
                XmlDocument::element(name, "t"),
                Err(InvalidXmlName(name.to_owned())),
                "{name:?}"
            );
        }
    }

    #[test]
    fn element_accepts_xml_names() {
        for name in ["a", "_x", "ns:item", "line-2.b", "\u{e9}l\u{e9}ment"] {
            assert!(XmlDocument::element(name, "t").is_ok(), "{name:?}");
        }
    }
}
