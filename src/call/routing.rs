use super::{client_identity, CallDirection, CLIENT_PREFIX};
use crate::directory::{Directory, DirectoryUser};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

static EMAIL_HINT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static USER_ID_HINT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^user_(\d+)$").ok());

#[derive(Debug, Clone, Default)]
pub struct RoutingRequest {
    /// `client:<identity>` or a bare phone number.
    pub destination: String,
    pub identity_hint: Option<String>,
    /// Provider-owned number that received the call (inbound only).
    pub dialed_number: Option<String>,
    pub direction: Option<CallDirection>,
}

impl RoutingRequest {
    pub fn new(destination: &str, direction: CallDirection) -> Self {
        Self {
            destination: destination.trim().to_string(),
            direction: Some(direction),
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: Option<&str>) -> Self {
        self.identity_hint = hint
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_dialed_number(mut self, number: Option<&str>) -> Self {
        self.dialed_number = number
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self
    }

    fn is_outbound(&self) -> bool {
        self.direction == Some(CallDirection::Outbound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Client,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    ClientAddress,
    IdentityHint,
    NumberMapping,
    Email,
    UserId,
    PhoneNumber,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// Client identity, or the phone number for PSTN legs.
    pub target: String,
    pub kind: TargetKind,
    pub play_greeting: bool,
    pub source: ResolutionSource,
}

impl RoutingDecision {
    fn client(target: String, source: ResolutionSource) -> Self {
        Self {
            target,
            kind: TargetKind::Client,
            play_greeting: false,
            source,
        }
    }

    pub fn is_client(&self) -> bool {
        self.kind == TargetKind::Client
    }

    /// Provider address form of the target.
    pub fn address(&self) -> String {
        match self.kind {
            TargetKind::Client => format!("{}{}", CLIENT_PREFIX, self.target),
            TargetKind::Number => self.target.clone(),
        }
    }
}

/// Deterministic identity derivation used when nothing else resolves. The
/// app registers its client identity with the same scheme, so a change here
/// needs a new variant rather than an edit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityScheme {
    /// `user_` followed by the ASCII digits of the number, `user` when the
    /// number has none.
    #[default]
    V1,
}

impl IdentityScheme {
    pub fn derive(&self, number: &str) -> String {
        match self {
            IdentityScheme::V1 => {
                let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    "user".to_string()
                } else {
                    format!("user_{}", digits)
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum HintKind<'a> {
    Plain(&'a str),
    Email(&'a str),
    UserId(i64),
}

fn classify_hint(hint: &str) -> HintKind<'_> {
    if EMAIL_HINT.as_ref().is_some_and(|re| re.is_match(hint)) {
        return HintKind::Email(hint);
    }
    if let Some(id) = USER_ID_HINT
        .as_ref()
        .and_then(|re| re.captures(hint))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        return HintKind::UserId(id);
    }
    HintKind::Plain(hint)
}

pub struct RoutingResolver {
    directory: Arc<dyn Directory>,
    greet_on_fallback: bool,
    scheme: IdentityScheme,
}

impl RoutingResolver {
    pub fn new(directory: Arc<dyn Directory>, greet_on_fallback: bool) -> Self {
        Self {
            directory,
            greet_on_fallback,
            scheme: IdentityScheme::V1,
        }
    }

    /// Decides where a call leg goes. Never fails: a directory outage
    /// degrades to the fallback identity.
    pub async fn resolve_destination(&self, request: &RoutingRequest) -> RoutingDecision {
        if let Some(identity) = client_identity(&request.destination) {
            return RoutingDecision::client(identity.to_string(), ResolutionSource::ClientAddress);
        }

        let hint = request.identity_hint.as_deref().map(classify_hint);
        if let Some(HintKind::Plain(identity)) = hint {
            return RoutingDecision::client(identity.to_string(), ResolutionSource::IdentityHint);
        }

        match self.lookup(request, hint).await {
            Ok(Some(decision)) => return decision,
            Ok(None) => {}
            Err(e) => {
                warn!(
                    destination = %request.destination,
                    "directory lookup failed, using fallback routing: {}", e
                );
            }
        }
        self.fallback(request)
    }

    async fn lookup(
        &self,
        request: &RoutingRequest,
        hint: Option<HintKind<'_>>,
    ) -> Result<Option<RoutingDecision>> {
        let mapped_number = if request.is_outbound() {
            Some(request.destination.as_str())
        } else {
            request
                .dialed_number
                .as_deref()
                .or(Some(request.destination.as_str()))
        };
        if let Some(number) = mapped_number.filter(|n| !n.is_empty()) {
            if let Some(mapping) = self.directory.number_mapping(number).await? {
                if mapping.active {
                    let identity = match self.directory.user_by_id(mapping.owner_id).await? {
                        Some(owner) => owner.client_identity(),
                        None => format!("user_{}", mapping.owner_id),
                    };
                    debug!(number, identity, "routing by number mapping");
                    return Ok(Some(RoutingDecision::client(
                        identity,
                        ResolutionSource::NumberMapping,
                    )));
                }
                debug!(number, "number mapping is inactive");
            }
        }

        let user: Option<(DirectoryUser, ResolutionSource)> = match hint {
            Some(HintKind::Email(email)) => self
                .directory
                .user_by_email(email)
                .await?
                .map(|u| (u, ResolutionSource::Email)),
            Some(HintKind::UserId(id)) => self
                .directory
                .user_by_id(id)
                .await?
                .map(|u| (u, ResolutionSource::UserId)),
            _ => None,
        };
        Ok(user.map(|(user, source)| RoutingDecision::client(user.client_identity(), source)))
    }

    fn fallback(&self, request: &RoutingRequest) -> RoutingDecision {
        if request.is_outbound() && !request.destination.is_empty() {
            return RoutingDecision {
                target: request.destination.clone(),
                kind: TargetKind::Number,
                play_greeting: false,
                source: ResolutionSource::PhoneNumber,
            };
        }
        let number = request
            .dialed_number
            .as_deref()
            .unwrap_or(request.destination.as_str());
        RoutingDecision {
            target: self.scheme.derive(number),
            kind: TargetKind::Client,
            play_greeting: self.greet_on_fallback,
            source: ResolutionSource::Fallback,
        }
    }
}
