use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use std::borrow::Cow;

use serde_with::DeserializeFromStr;
use url::{ParseError, Url};

const REPLACEMENT_TOKEN: &str = "*";

/// A URL that never reveals its credentials when formatted.
///
/// Beacon node URLs commonly embed basic auth credentials or API keys in the userinfo part.
/// Endpoints are logged all the time, so the only way to get at the raw URL is [`Self::as_url`].
#[derive(Clone, PartialEq, Eq, Hash, DeserializeFromStr)]
pub struct RedactingUrl(Url);

impl FromStr for RedactingUrl {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        string.parse().map(Self)
    }
}

impl From<Url> for RedactingUrl {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl Display for RedactingUrl {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        Display::fmt(&self.redacted(), formatter)
    }
}

impl Debug for RedactingUrl {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        Debug::fmt(self.redacted().as_str(), formatter)
    }
}

impl RedactingUrl {
    #[must_use]
    pub const fn as_url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn into_url(self) -> Url {
        self.0
    }

    pub fn join(&self, path: &str) -> Result<Self, ParseError> {
        self.0.join(path).map(Self)
    }

    fn redacted(&self) -> Cow<'_, Url> {
        let url = &self.0;

        if url.username().is_empty() && url.password().is_none() {
            return Cow::Borrowed(url);
        }

        let mut redacted = url.clone();

        // Both setters only fail for URLs that cannot have credentials in the first place.
        if !url.username().is_empty() && redacted.set_username(REPLACEMENT_TOKEN).is_err() {
            return Cow::Borrowed(url);
        }

        if url.password().is_some() && redacted.set_password(Some(REPLACEMENT_TOKEN)).is_err() {
            return Cow::Borrowed(url);
        }

        Cow::Owned(redacted)
    }
}
