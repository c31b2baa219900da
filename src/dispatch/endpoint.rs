use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Upload target. Headers behave like a map but keep the order in which
/// keys were first inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EndpointDescriptor {
    url: String,
    #[serde(default, deserialize_with = "deserialize_headers")]
    headers: Vec<Header>,
}

impl EndpointDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn builder(url: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            endpoint: Self::new(url),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }
}

impl std::fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{url:{}}}", self.url)
    }
}

pub struct EndpointBuilder {
    endpoint: EndpointDescriptor,
}

impl EndpointBuilder {
    /// Sets `key`, replacing the value in place if it is already present.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(
            &mut self.endpoint.headers,
            Header {
                key: key.into(),
                value: value.into(),
            },
        );
        self
    }

    pub fn with_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |builder, (k, v)| builder.with_header(k, v))
    }

    pub fn build(self) -> EndpointDescriptor {
        self.endpoint
    }
}

fn set_header(headers: &mut Vec<Header>, header: Header) {
    match headers.iter_mut().find(|h| h.key == header.key) {
        Some(existing) => existing.value = header.value,
        None => headers.push(header),
    }
}

/// Repeated keys collapse the same way [`EndpointBuilder::with_header`] does:
/// the first position is kept and the last value wins.
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<Header>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Header>::deserialize(deserializer)?;
    let mut headers = Vec::with_capacity(raw.len());
    for header in raw {
        set_header(&mut headers, header);
    }
    Ok(headers)
}

pub fn endpoints_to_json(endpoints: &[EndpointDescriptor]) -> Result<String, serde_json::Error> {
    serde_json::to_string(endpoints)
}

pub fn endpoints_from_json(json: &str) -> Result<Vec<EndpointDescriptor>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_endpoints() -> Vec<EndpointDescriptor> {
        vec![
            EndpointDescriptor::builder("https://one.example/locations")
                .with_header("Authorization", "Bearer abc")
                .with_header("X-Zeta", "z")
                .with_header("X-Alpha", "a")
                .build(),
            EndpointDescriptor::new("https://two.example/ingest"),
        ]
    }

    #[test]
    fn json_shape() {
        let json = endpoints_to_json(&sample_endpoints()[..1]).unwrap();
        assert_eq!(
            json,
            r#"[{"url":"https://one.example/locations","headers":[{"key":"Authorization","value":"Bearer abc"},{"key":"X-Zeta","value":"z"},{"key":"X-Alpha","value":"a"}]}]"#
        );
    }

    #[test]
    fn round_trip_preserves_order() {
        let endpoints = sample_endpoints();
        let json = endpoints_to_json(&endpoints).unwrap();
        let parsed = endpoints_from_json(&json).unwrap();

        assert_eq!(parsed, endpoints);
        assert_eq!(endpoints_to_json(&parsed).unwrap(), json);
    }

    #[test]
    fn replacing_header_keeps_position() {
        let endpoint = EndpointDescriptor::builder("https://x.example")
            .with_header("a", "1")
            .with_header("b", "2")
            .with_header("a", "3")
            .build();

        let keys: Vec<_> = endpoint.headers().iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(endpoint.header("a"), Some("3"));
    }

    #[test]
    fn repeated_header_keys_collapse_on_parse() {
        let parsed = endpoints_from_json(
            r#"[{"url":"https://x.example","headers":[{"key":"a","value":"1"},{"key":"b","value":"2"},{"key":"a","value":"3"}]}]"#,
        )
        .unwrap();

        let expected = EndpointDescriptor::builder("https://x.example")
            .with_header("a", "1")
            .with_header("b", "2")
            .with_header("a", "3")
            .build();
        assert_eq!(parsed[0], expected);
        assert_eq!(parsed[0].headers().len(), 2);
        assert_eq!(parsed[0].header("a"), Some("3"));
    }

    #[test]
    fn headers_key_is_optional() {
        let parsed = endpoints_from_json(r#"[{"url":"https://x.example"}]"#).unwrap();
        assert!(parsed[0].headers().is_empty());
        assert!(endpoints_from_json(r#"[{"headers":[]}]"#).is_err());
    }
}
