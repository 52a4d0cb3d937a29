//! The persisted credential record and its staleness classification

use chrono::{DateTime, SecondsFormat, Utc};
use tollgate_clock::{DurationMillis, UnixMillis};

use crate::store::{CredentialStore, StoreError};
use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// Store key holding the current access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Store key holding the current refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Store key holding the access token's validity in milliseconds
pub const EXPIRES_IN_KEY: &str = "expires_in";
/// Store key holding the time the access token was last issued
pub const REFRESH_TIME_KEY: &str = "refresh_time";

/// The refresh time assigned to a record without an access token
///
/// 2000-01-01T00:00:00Z, far enough in the past that an empty record always
/// classifies as expired.
pub const EMPTY_REFRESH_TIME: UnixMillis = UnixMillis(946_684_800_000);

/// A token's lifecycle state, as evaluated before each use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// The cached access token can be used as-is
    Fresh,
    /// The access token has expired, but a refresh token is available
    ExpiredWithRefresh,
    /// The access token has expired and a full reacquire is required
    ExpiredNoRefresh,
}

/// The four persisted fields tracking the current token state
///
/// Construction always normalizes: a record without an access token carries
/// [`EMPTY_REFRESH_TIME`] and a zero `expires_in`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRecord {
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    expires_in: DurationMillis,
    refresh_time: UnixMillis,
}

impl Default for CredentialRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl CredentialRecord {
    /// A record that has never held a token
    pub const fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_in: DurationMillis::ZERO,
            refresh_time: EMPTY_REFRESH_TIME,
        }
    }

    /// A record freshly issued by a full token exchange
    pub fn issued(
        access_token: AccessToken,
        refresh_token: Option<RefreshToken>,
        expires_in: DurationMillis,
        refresh_time: UnixMillis,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token,
            expires_in,
            refresh_time,
        }
        .normalized()
    }

    /// Replaces the access token after a refresh exchange, keeping the
    /// current refresh token
    pub fn with_refreshed_access(
        self,
        access_token: AccessToken,
        expires_in: DurationMillis,
        refresh_time: UnixMillis,
    ) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: self.refresh_token,
            expires_in,
            refresh_time,
        }
        .normalized()
    }

    /// Builds a record from raw persisted values
    ///
    /// Absent, empty, non-positive or unparsable values fall back to their
    /// empty defaults. This never fails.
    pub fn from_raw(
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expires_in: Option<&str>,
        refresh_time: Option<&str>,
    ) -> Self {
        Self {
            access_token: non_empty(access_token).map(|t| AccessToken::new(t.to_owned())),
            refresh_token: non_empty(refresh_token).map(|t| RefreshToken::new(t.to_owned())),
            expires_in: expires_in.map(parse_expires_in).unwrap_or_default(),
            refresh_time: refresh_time
                .and_then(parse_refresh_time)
                .unwrap_or(EMPTY_REFRESH_TIME),
        }
        .normalized()
    }

    fn normalized(mut self) -> Self {
        if self.access_token.is_none() {
            self.expires_in = DurationMillis::ZERO;
            self.refresh_time = EMPTY_REFRESH_TIME;
        }
        self
    }

    /// Gets the current access token, if any
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Gets the current refresh token, if any
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets how long the access token is valid from its refresh time
    #[inline]
    pub fn expires_in(&self) -> DurationMillis {
        self.expires_in
    }

    /// Gets the time the access token was last issued
    #[inline]
    pub fn refresh_time(&self) -> UnixMillis {
        self.refresh_time
    }

    /// Whether this record has never held a token, or has been cleared
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    /// Computes the token's age at `now`, padded by `safety_margin`
    #[inline]
    pub fn token_age_at(&self, now: UnixMillis, safety_margin: DurationMillis) -> DurationMillis {
        now.saturating_since(self.refresh_time) + safety_margin
    }

    /// Classifies the record as of `now`
    pub fn state_at(&self, now: UnixMillis, safety_margin: DurationMillis) -> TokenState {
        if self.access_token.is_some() && self.token_age_at(now, safety_margin) < self.expires_in {
            TokenState::Fresh
        } else if self.refresh_token.is_some() {
            TokenState::ExpiredWithRefresh
        } else {
            TokenState::ExpiredNoRefresh
        }
    }

    /// Reads the record from a store
    ///
    /// Keys missing from the store entirely are created with their empty
    /// defaults. Keys that are present are never rewritten here, even when
    /// their values are corrupt.
    pub async fn load<S>(store: &S) -> Result<Self, StoreError>
    where
        S: CredentialStore + ?Sized,
    {
        let access_token = store.get(ACCESS_TOKEN_KEY).await?;
        let refresh_token = store.get(REFRESH_TOKEN_KEY).await?;
        let expires_in = store.get(EXPIRES_IN_KEY).await?;
        let refresh_time = store.get(REFRESH_TIME_KEY).await?;

        let defaults = Self::empty().encode();
        let raw = [&access_token, &refresh_token, &expires_in, &refresh_time];
        let missing: Vec<(&str, &str)> = defaults
            .iter()
            .zip(raw)
            .filter(|(_, value)| value.is_none())
            .map(|((key, default), _)| (*key, default.as_str()))
            .collect();

        if !missing.is_empty() {
            tracing::debug!(
                missing = ?missing.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
                "credential record fields not found in store, adding defaults"
            );
            store.set_many(&missing).await?;
        }

        Ok(Self::from_raw(
            access_token.as_deref(),
            refresh_token.as_deref(),
            expires_in.as_deref(),
            refresh_time.as_deref(),
        ))
    }

    /// Writes all four fields to the store as a unit
    pub async fn persist<S>(&self, store: &S) -> Result<(), StoreError>
    where
        S: CredentialStore + ?Sized,
    {
        let encoded = self.encode();
        let entries: Vec<(&str, &str)> = encoded.iter().map(|(k, v)| (*k, v.as_str())).collect();
        store.set_many(&entries).await
    }

    /// Writes the access token, expiry and refresh time, leaving the stored
    /// refresh token as it is
    pub async fn persist_access<S>(&self, store: &S) -> Result<(), StoreError>
    where
        S: CredentialStore + ?Sized,
    {
        let encoded = self.encode();
        let entries: Vec<(&str, &str)> = encoded
            .iter()
            .filter(|(k, _)| *k != REFRESH_TOKEN_KEY)
            .map(|(k, v)| (*k, v.as_str()))
            .collect();
        store.set_many(&entries).await
    }

    /// Resets the stored record to the empty state
    pub async fn clear<S>(store: &S) -> Result<(), StoreError>
    where
        S: CredentialStore + ?Sized,
    {
        Self::empty().persist(store).await
    }

    /// Encodes the record as its persisted key/value pairs
    pub fn encode(&self) -> [(&'static str, String); 4] {
        [
            (
                ACCESS_TOKEN_KEY,
                self.access_token
                    .as_ref()
                    .map(|t| t.as_str().to_owned())
                    .unwrap_or_default(),
            ),
            (
                REFRESH_TOKEN_KEY,
                self.refresh_token
                    .as_ref()
                    .map(|t| t.as_str().to_owned())
                    .unwrap_or_default(),
            ),
            (EXPIRES_IN_KEY, self.expires_in.0.to_string()),
            (REFRESH_TIME_KEY, format_refresh_time(self.refresh_time)),
        ]
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn parse_expires_in(raw: &str) -> DurationMillis {
    let raw = raw.trim();
    let millis = raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    });

    match millis {
        Some(m) if m > 0 => DurationMillis(m as u64),
        _ => DurationMillis::ZERO,
    }
}

fn parse_refresh_time(raw: &str) -> Option<UnixMillis> {
    let raw = raw.trim();
    let millis = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|t| t.timestamp_millis())
        .ok()
        .or_else(|| raw.parse::<i64>().ok())?;

    u64::try_from(millis)
        .ok()
        .filter(|m| *m > 0)
        .map(UnixMillis)
}

fn format_refresh_time(time: UnixMillis) -> String {
    i64::try_from(time.0)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| time.0.to_string())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::store::InMemoryStore;

    const MARGIN: DurationMillis = DurationMillis(60_000);
    const HOUR: DurationMillis = DurationMillis(3_600_000);
    const NOW: UnixMillis = UnixMillis(1_700_000_000_000);

    mod when_normalizing_raw_values {
        use super::*;

        #[test]
        fn all_absent_yields_the_empty_record() {
            let record = CredentialRecord::from_raw(None, None, None, None);

            assert_eq!(record, CredentialRecord::empty());
            assert_eq!(record.refresh_time(), EMPTY_REFRESH_TIME);
            assert_eq!(record.expires_in(), DurationMillis::ZERO);
        }

        #[test]
        fn empty_access_token_forces_epoch_defaults() {
            let record = CredentialRecord::from_raw(
                Some(""),
                Some("r1"),
                Some("3600000"),
                Some("2023-11-14T22:13:20.000Z"),
            );

            assert_eq!(record.access_token(), None);
            assert_eq!(record.refresh_token().map(|r| r.as_str()), Some("r1"));
            assert_eq!(record.expires_in(), DurationMillis::ZERO);
            assert_eq!(record.refresh_time(), EMPTY_REFRESH_TIME);
        }

        #[test]
        fn non_positive_expires_in_is_zero() {
            for raw in ["0", "-5", "abc", "", "NaN"] {
                let record = CredentialRecord::from_raw(Some("a1"), None, Some(raw), None);
                assert_eq!(record.expires_in(), DurationMillis::ZERO, "input {:?}", raw);
            }
        }

        #[test]
        fn fractional_expires_in_is_truncated() {
            let record = CredentialRecord::from_raw(Some("a1"), None, Some("7200000.9"), None);
            assert_eq!(record.expires_in(), DurationMillis(7_200_000));
        }

        #[test]
        fn unparsable_refresh_time_falls_back_to_default() {
            for raw in ["yesterday", "", "1969-12-31T23:59:59Z", "-1"] {
                let record =
                    CredentialRecord::from_raw(Some("a1"), None, Some("1000"), Some(raw));
                assert_eq!(record.refresh_time(), EMPTY_REFRESH_TIME, "input {:?}", raw);
            }
        }

        #[test]
        fn refresh_time_accepts_several_formats() {
            let expected = UnixMillis(1_645_092_000_000);
            for raw in [
                "2022-02-17T10:00:00.000Z",
                "2022-02-17T11:00:00+01:00",
                "Thu, 17 Feb 2022 10:00:00 +0000",
                "1645092000000",
            ] {
                let record =
                    CredentialRecord::from_raw(Some("a1"), None, Some("1000"), Some(raw));
                assert_eq!(record.refresh_time(), expected, "input {:?}", raw);
            }
        }
    }

    mod when_classifying {
        use super::*;

        #[test]
        fn recent_token_is_fresh() {
            let record = CredentialRecord::issued(
                AccessToken::from_static("a1"),
                None,
                HOUR,
                NOW - DurationMillis(58 * 60 * 1000),
            );

            assert_eq!(record.state_at(NOW, MARGIN), TokenState::Fresh);
        }

        #[test]
        fn safety_margin_expires_tokens_early() {
            let record = CredentialRecord::issued(
                AccessToken::from_static("a1"),
                None,
                HOUR,
                NOW - DurationMillis(59 * 60 * 1000 + 1),
            );

            assert_eq!(record.state_at(NOW, DurationMillis::ZERO), TokenState::Fresh);
            assert_eq!(record.state_at(NOW, MARGIN), TokenState::ExpiredNoRefresh);
        }

        #[test]
        fn expired_token_with_refresh_token_can_be_refreshed() {
            let record = CredentialRecord::issued(
                AccessToken::from_static("a1"),
                Some(RefreshToken::from_static("r1")),
                HOUR,
                NOW - DurationMillis(2 * 3_600_000),
            );

            assert_eq!(record.state_at(NOW, MARGIN), TokenState::ExpiredWithRefresh);
        }

        #[test]
        fn refresh_time_in_the_future_only_counts_the_margin() {
            let record = CredentialRecord::issued(
                AccessToken::from_static("a1"),
                None,
                HOUR,
                NOW + HOUR,
            );

            assert_eq!(record.token_age_at(NOW, MARGIN), MARGIN);
            assert_eq!(record.state_at(NOW, MARGIN), TokenState::Fresh);
        }

        #[test]
        fn refreshed_access_keeps_refresh_token() {
            let record = CredentialRecord::issued(
                AccessToken::from_static("a1"),
                Some(RefreshToken::from_static("r1")),
                HOUR,
                EMPTY_REFRESH_TIME,
            )
            .with_refreshed_access(AccessToken::from_static("a2"), HOUR, NOW);

            assert_eq!(record.access_token().map(|a| a.as_str()), Some("a2"));
            assert_eq!(record.refresh_token().map(|r| r.as_str()), Some("r1"));
            assert_eq!(record.refresh_time(), NOW);
        }
    }

    mod when_persisting {
        use super::*;

        #[tokio::test]
        async fn load_creates_missing_keys_with_defaults() {
            let store = InMemoryStore::new();

            let record = CredentialRecord::load(&store).await.unwrap();

            assert_eq!(record, CredentialRecord::empty());
            let snapshot = store.snapshot().await;
            assert_eq!(snapshot.get(ACCESS_TOKEN_KEY).map(String::as_str), Some(""));
            assert_eq!(snapshot.get(REFRESH_TOKEN_KEY).map(String::as_str), Some(""));
            assert_eq!(snapshot.get(EXPIRES_IN_KEY).map(String::as_str), Some("0"));
            assert_eq!(
                snapshot.get(REFRESH_TIME_KEY).map(String::as_str),
                Some("2000-01-01T00:00:00.000Z")
            );
        }

        #[tokio::test]
        async fn load_leaves_corrupt_values_in_place() {
            let store = InMemoryStore::from_entries([
                (ACCESS_TOKEN_KEY, "a1"),
                (REFRESH_TOKEN_KEY, ""),
                (EXPIRES_IN_KEY, "not a number"),
                (REFRESH_TIME_KEY, "garbage"),
            ]);
            let before = store.snapshot().await;

            let record = CredentialRecord::load(&store).await.unwrap();

            assert_eq!(record.expires_in(), DurationMillis::ZERO);
            assert_eq!(record.refresh_time(), EMPTY_REFRESH_TIME);
            assert_eq!(store.snapshot().await, before);
        }

        #[tokio::test]
        async fn persist_access_does_not_touch_refresh_token() {
            let store = InMemoryStore::from_entries([(REFRESH_TOKEN_KEY, "kept")]);
            let record = CredentialRecord::issued(
                AccessToken::from_static("a2"),
                Some(RefreshToken::from_static("ignored")),
                HOUR,
                NOW,
            );

            record.persist_access(&store).await.unwrap();

            let snapshot = store.snapshot().await;
            assert_eq!(snapshot.get(REFRESH_TOKEN_KEY).map(String::as_str), Some("kept"));
            assert_eq!(snapshot.get(ACCESS_TOKEN_KEY).map(String::as_str), Some("a2"));
        }

        #[tokio::test]
        async fn clear_reverts_to_the_empty_record() {
            let store = InMemoryStore::new();
            CredentialRecord::issued(
                AccessToken::from_static("a1"),
                Some(RefreshToken::from_static("r1")),
                HOUR,
                NOW,
            )
            .persist(&store)
            .await
            .unwrap();

            CredentialRecord::clear(&store).await.unwrap();

            let record = CredentialRecord::load(&store).await.unwrap();
            assert!(record.is_empty());
            assert_eq!(record, CredentialRecord::empty());
        }
    }

    fn arb_record() -> impl Strategy<Value = CredentialRecord> {
        (
            proptest::option::of("[a-zA-Z0-9._-]{1,40}"),
            proptest::option::of("[a-zA-Z0-9._-]{1,40}"),
            0u64..10_000_000,
            EMPTY_REFRESH_TIME.0..4_102_444_800_000u64,
        )
            .prop_map(|(access, refresh, expires_in, refresh_time)| match access {
                Some(access) => CredentialRecord::issued(
                    AccessToken::new(access),
                    refresh.map(RefreshToken::new),
                    DurationMillis(expires_in),
                    UnixMillis(refresh_time),
                ),
                None => CredentialRecord::from_raw(None, refresh.as_deref(), None, None),
            })
    }

    proptest! {
        #[test]
        fn records_without_access_token_are_always_expired(
            refresh in proptest::option::of("[a-z0-9]{1,12}"),
            expires_in in proptest::option::of("-?[0-9]{0,12}"),
            refresh_time in proptest::option::of(".{0,30}"),
            now in EMPTY_REFRESH_TIME.0..u64::MAX / 2,
            margin in 0u64..120_000,
        ) {
            let record = CredentialRecord::from_raw(
                None,
                refresh.as_deref(),
                expires_in.as_deref(),
                refresh_time.as_deref(),
            );

            prop_assert_eq!(record.refresh_time(), EMPTY_REFRESH_TIME);
            prop_assert_eq!(record.expires_in(), DurationMillis::ZERO);
            prop_assert!(record.token_age_at(UnixMillis(now), DurationMillis(margin)) >= record.expires_in());
            prop_assert_ne!(record.state_at(UnixMillis(now), DurationMillis(margin)), TokenState::Fresh);
        }

        #[test]
        fn encoding_round_trips_without_changing_classification(
            record in arb_record(),
            now in EMPTY_REFRESH_TIME.0..4_102_444_800_000u64,
        ) {
            let encoded = record.encode();
            let reloaded = CredentialRecord::from_raw(
                Some(encoded[0].1.as_str()),
                Some(encoded[1].1.as_str()),
                Some(encoded[2].1.as_str()),
                Some(encoded[3].1.as_str()),
            );

            prop_assert_eq!(&reloaded, &record);
            prop_assert_eq!(
                reloaded.state_at(UnixMillis(now), MARGIN),
                record.state_at(UnixMillis(now), MARGIN)
            );
        }
    }
}
