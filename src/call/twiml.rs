use std::fmt;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

pub const ALREADY_CONNECTED: &str = "Call is already connected.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Client(String),
    Number(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dial {
    pub target: DialTarget,
    pub caller_id: Option<String>,
    pub timeout: Option<u32>,
    pub action: Option<String>,
    pub method: Option<String>,
    pub record: Option<String>,
}

impl Dial {
    pub fn client(identity: &str) -> Self {
        Self::new(DialTarget::Client(identity.to_string()))
    }

    pub fn number(number: &str) -> Self {
        Self::new(DialTarget::Number(number.to_string()))
    }

    fn new(target: DialTarget) -> Self {
        Self {
            target,
            caller_id: None,
            timeout: None,
            action: None,
            method: None,
            record: None,
        }
    }

    pub fn caller_id(mut self, caller_id: Option<&str>) -> Self {
        self.caller_id = caller_id.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    pub fn timeout(mut self, secs: u32) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Posts the `<Dial>` outcome to `url`.
    pub fn action(mut self, url: &str) -> Self {
        self.action = Some(url.to_string());
        self.method = Some("POST".to_string());
        self
    }

    pub fn do_not_record(mut self) -> Self {
        self.record = Some("do-not-record".to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say { text: String, voice: Option<String> },
    Dial(Dial),
    Pause { length: u32 },
    Hangup,
}

/// Provider instruction document for one call leg.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(Verb::Say {
            text: text.to_string(),
            voice: None,
        });
        self
    }

    pub fn say_with_voice(mut self, voice: &str, text: &str) -> Self {
        self.verbs.push(Verb::Say {
            text: text.to_string(),
            voice: Some(voice.to_string()),
        });
        self
    }

    pub fn dial(mut self, dial: Dial) -> Self {
        self.verbs.push(Verb::Dial(dial));
        self
    }

    pub fn pause(mut self, length: u32) -> Self {
        self.verbs.push(Verb::Pause { length });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    /// Spoken message followed by a hangup.
    pub fn message(text: &str) -> Self {
        Self::new().say(text).hangup()
    }

    /// Neutral document returned for a call id that was already dialed.
    pub fn already_connected() -> Self {
        Self::message(ALREADY_CONNECTED)
    }

    /// The dial verb, if this document connects the call anywhere.
    pub fn dial_target(&self) -> Option<&DialTarget> {
        self.verbs.iter().find_map(|verb| match verb {
            Verb::Dial(dial) => Some(&dial.target),
            _ => None,
        })
    }

    pub fn to_xml(&self) -> String {
        self.to_string()
    }
}

fn write_attr(f: &mut fmt::Formatter<'_>, name: &str, value: Option<&str>) -> fmt::Result {
    match value {
        Some(value) => write!(f, r#" {}="{}""#, name, xml_escape(value)),
        None => Ok(()),
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Say { text, voice } => {
                f.write_str("<Say")?;
                write_attr(f, "voice", voice.as_deref())?;
                write!(f, ">{}</Say>", xml_escape(text))
            }
            Verb::Dial(dial) => {
                f.write_str("<Dial")?;
                write_attr(f, "callerId", dial.caller_id.as_deref())?;
                if let Some(timeout) = dial.timeout {
                    write!(f, r#" timeout="{}""#, timeout)?;
                }
                write_attr(f, "action", dial.action.as_deref())?;
                write_attr(f, "method", dial.method.as_deref())?;
                write_attr(f, "record", dial.record.as_deref())?;
                f.write_str(">")?;
                match &dial.target {
                    DialTarget::Client(identity) => {
                        write!(f, "<Client>{}</Client>", xml_escape(identity))?
                    }
                    DialTarget::Number(number) => {
                        write!(f, "<Number>{}</Number>", xml_escape(number))?
                    }
                }
                f.write_str("</Dial>")
            }
            Verb::Pause { length } => write!(f, r#"<Pause length="{}"/>"#, length),
            Verb::Hangup => f.write_str("<Hangup/>"),
        }
    }
}

impl fmt::Display for VoiceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(XML_HEADER)?;
        f.write_str("<Response>")?;
        for verb in &self.verbs {
            write!(f, "{}", verb)?;
        }
        f.write_str("</Response>")
    }
}

pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_connected_document() {
        let xml = VoiceResponse::already_connected().to_xml();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>Call is already connected.</Say><Hangup/></Response>"#
        );
    }

    #[test]
    fn test_dial_client_attributes() {
        let response = VoiceResponse::new().dial(
            Dial::client("alice")
                .caller_id(Some("+15550100"))
                .timeout(30)
                .action("https://voice.example.com/call-action-result")
                .do_not_record(),
        );
        let xml = response.to_xml();
        assert!(xml.contains(
            r#"<Dial callerId="+15550100" timeout="30" action="https://voice.example.com/call-action-result" method="POST" record="do-not-record"><Client>alice</Client></Dial>"#
        ));
        assert_eq!(
            response.dial_target(),
            Some(&DialTarget::Client("alice".to_string()))
        );
    }

    #[test]
    fn test_empty_caller_id_omitted() {
        let xml = VoiceResponse::new()
            .dial(Dial::number("+15550199").caller_id(Some("")))
            .to_xml();
        assert!(xml.contains("<Dial><Number>+15550199</Number></Dial>"));
    }

    #[test]
    fn test_escaping() {
        let xml = VoiceResponse::new()
            .say_with_voice("alice", "Tom & \"Jerry\" <3")
            .pause(2)
            .to_xml();
        assert!(xml.contains(
            r#"<Say voice="alice">Tom &amp; &quot;Jerry&quot; &lt;3</Say><Pause length="2"/>"#
        ));
        assert!(VoiceResponse::new().hangup().dial_target().is_none());
    }
}
