use aliri::{
    error::ClaimsRejected,
    jwt::{self, Audiences, ClaimsValidator, CoreClaims, IssuerRef, SubjectRef},
};
use aliri_clock::{Clock, UnixTime};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// A NumericDate claim as found in a token payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumericDate {
    Absent,
    At(UnixTime),
    Invalid,
}

impl NumericDate {
    /// Reads a NumericDate, rounding fractional seconds up
    fn read(value: Option<&Value>) -> Self {
        match value {
            None => Self::Absent,
            Some(value) => match value.as_u64() {
                Some(secs) => Self::At(UnixTime(secs)),
                None => match value.as_f64() {
                    Some(secs) if secs.is_finite() && secs >= 0.0 => {
                        Self::At(UnixTime(secs.ceil() as u64))
                    }
                    _ => Self::Invalid,
                },
            },
        }
    }

    fn time(self) -> Option<UnixTime> {
        match self {
            Self::At(time) => Some(time),
            Self::Absent | Self::Invalid => None,
        }
    }
}

/// An arbitrary token payload with its registered claims extracted
#[derive(Clone, Debug)]
pub(crate) struct Claims {
    payload: Map<String, Value>,
    aud: Audiences,
    iss: Option<jwt::Issuer>,
    sub: Option<jwt::Subject>,
    exp: NumericDate,
    nbf: NumericDate,
}

impl Claims {
    pub(crate) fn from_payload(payload: Map<String, Value>) -> Self {
        let aud = payload
            .get("aud")
            .and_then(|aud| Audiences::deserialize(aud).ok())
            .unwrap_or_else(Audiences::empty);
        let iss = payload
            .get("iss")
            .and_then(Value::as_str)
            .map(|iss| jwt::Issuer::new(iss.to_owned()));
        let sub = payload
            .get("sub")
            .and_then(Value::as_str)
            .map(|sub| jwt::Subject::new(sub.to_owned()));
        let exp = NumericDate::read(payload.get("exp"));
        let nbf = NumericDate::read(payload.get("nbf"));

        Self {
            payload,
            aud,
            iss,
            sub,
            exp,
            nbf,
        }
    }

    pub(crate) fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

impl<'de> Deserialize<'de> for Claims {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Map::deserialize(deserializer).map(Self::from_payload)
    }
}

impl CoreClaims for Claims {
    fn nbf(&self) -> Option<UnixTime> {
        self.nbf.time()
    }

    fn exp(&self) -> Option<UnixTime> {
        self.exp.time()
    }

    fn aud(&self) -> &Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&IssuerRef> {
        self.iss.as_deref()
    }

    fn sub(&self) -> Option<&SubjectRef> {
        self.sub.as_deref()
    }
}

/// Checks `nbf` and `exp`, when present, against a clock with leeway
///
/// A token is not yet valid while `nbf > now + leeway` and has expired
/// once `now >= exp + leeway`.
#[derive(Debug)]
pub(crate) struct ValidityWindow<'a, C> {
    pub(crate) clock: &'a C,
    pub(crate) leeway: u64,
}

impl<C, H> ClaimsValidator<Claims, H> for ValidityWindow<'_, C>
where
    C: Clock,
{
    fn validate(&self, _: &H, claims: &Claims) -> Result<(), ClaimsRejected> {
        let now = self.clock.now();

        match claims.nbf {
            NumericDate::At(nbf) if nbf.0 > now.0.saturating_add(self.leeway) => {
                return Err(ClaimsRejected::TokenNotYetValid)
            }
            NumericDate::Invalid => {
                return Err(ClaimsRejected::Custom("invalid nbf value".into()))
            }
            _ => {}
        }

        match claims.exp {
            NumericDate::At(exp) if now.0 >= exp.0.saturating_add(self.leeway) => {
                Err(ClaimsRejected::TokenExpired)
            }
            NumericDate::Invalid => Err(ClaimsRejected::Custom("invalid exp value".into())),
            _ => Ok(()),
        }
    }
}
