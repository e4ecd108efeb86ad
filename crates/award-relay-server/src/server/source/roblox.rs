use super::{Award, AwardSource, SourceError, reconcile};
use award_relay_core::{ItemId, ItemResult, MAX_CHUNK_SIZE, Subject};
use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::Deserialize;

/// [`AwardSource`] backed by the Roblox badges API.
///
/// Issues one `GET {base_url}/users/{subject}/badges/awarded-dates?badgeIds=..`
/// per call. The response lists only badges the user owns, so every call ends
/// with [`reconcile`] against the requested identifiers.
///
/// Cloning is cheap: the underlying [`reqwest::Client`] shares its connection
/// pool and proxy settings across clones.
#[derive(Debug, Clone)]
pub struct RobloxBadges {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AwardedDatesResponse {
    data: Vec<AwardedDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwardedDate {
    badge_id: ItemId,
    #[serde(default)]
    awarded_date: Option<DateTime<Utc>>,
}

impl RobloxBadges {
    /// Builds a source with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Fails if `proxy` is not a valid proxy URL or the client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("award-relay/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn awarded_dates_url(&self, subject: Subject, identifiers: &[ItemId]) -> String {
        let ids = identifiers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/users/{subject}/badges/awarded-dates?badgeIds={ids}",
            self.base_url
        )
    }
}

impl AwardSource for RobloxBadges {
    async fn fetch_award_status(
        &self,
        subject: Subject,
        identifiers: &[ItemId],
    ) -> Result<Vec<ItemResult>, SourceError> {
        if identifiers.len() > MAX_CHUNK_SIZE {
            return Err(SourceError::TooManyIdentifiers {
                count: identifiers.len(),
            });
        }

        let response = self
            .client
            .get(self.awarded_dates_url(subject, identifiers))
            .send()
            .await
            .map_err(SourceError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Awarded-dates lookup for subject {subject} answered {status}");
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }

        let body: AwardedDatesResponse = response.json().await.map_err(SourceError::Decode)?;
        let awarded: Vec<Award> = body
            .data
            .into_iter()
            .map(|entry| Award {
                identifier: entry.badge_id,
                awarded_at: entry.awarded_date,
            })
            .collect();

        Ok(reconcile(identifiers, &awarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> RobloxBadges {
        RobloxBadges::new(server.uri(), None, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn reconciles_partial_answer_against_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/123/badges/awarded-dates"))
            .and(query_param("badgeIds", "1,2,3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "badgeId": 2, "awardedDate": "2023-04-05T06:07:08.123Z" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = source(&server)
            .fetch_award_status(123, &[1, 2, 3])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(!results[0].owned && results[0].awarded_at.is_none());
        assert!(results[1].owned);
        assert_eq!(
            results[1].awarded_at,
            Some("2023-04-05T06:07:08.123Z".parse().unwrap())
        );
        assert!(!results[2].owned && results[2].awarded_at.is_none());
        assert!(results.iter().all(|r| !r.from_cache));
    }

    #[tokio::test]
    async fn non_success_status_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_award_status(1, &[10])
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Status { status: 429 }));
    }

    #[tokio::test]
    async fn unparsable_body_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_award_status(1, &[10])
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        // Nothing listens on the discard port.
        let source =
            RobloxBadges::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();

        let err = source.fetch_award_status(1, &[10]).await.unwrap_err();

        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[tokio::test]
    async fn refuses_oversized_chunks_without_calling_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let identifiers: Vec<ItemId> = (0..=MAX_CHUNK_SIZE as u64).collect();
        let err = source(&server)
            .fetch_award_status(1, &identifiers)
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::TooManyIdentifiers { count: 101 }));
    }

    #[test]
    fn rejects_invalid_proxy() {
        let source = RobloxBadges::new(
            "http://localhost",
            Some("::not a proxy::"),
            Duration::from_secs(1),
        );
        assert!(source.is_err());
    }
}
