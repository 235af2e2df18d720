//! Argument builders for read operations
//!
//! Every builder validates on conversion to a service request, so malformed
//! input fails with [`Error::InvalidArgument`] before the service is
//! contacted. A timeout of `0` means no deadline; an unset timeout falls back
//! to the client configuration.

use crate::config::ClientConfig;
use crate::core::statement::EntityRef;
use crate::core::temporal::TimePoint;
use crate::core::value::{Keyword, Value};
use crate::error::{Error, Result};
use crate::index::{IndexOrder, Limit, Page, ValueRange};
use crate::query::{parse_pattern, parse_selector, PullPattern, Query, QueryInput, QueryRequest};
use crate::service::{DatomsRequest, IndexPullRequest, IndexRangeRequest, PullRequest};
use std::time::Duration;

/// Shared offset/limit/timeout options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Window {
    offset: usize,
    limit: Option<i64>,
    timeout_ms: Option<u64>,
}

impl Window {
    fn page(&self, config: &ClientConfig) -> Result<Page> {
        let limit = Limit::from_raw(self.limit.unwrap_or(config.default_limit))?;
        Ok(Page::new(self.offset, limit))
    }

    fn timeout(&self, config: &ClientConfig) -> Option<Duration> {
        match self.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => config.timeout,
        }
    }
}

macro_rules! window_setters {
    () => {
        /// Skip this many matches
        pub fn offset(mut self, offset: usize) -> Self {
            self.window.offset = offset;
            self
        }

        /// Cap the number of results; `-1` for all, `0` is rejected
        pub fn limit(mut self, limit: i64) -> Self {
            self.window.limit = Some(limit);
            self
        }

        /// Per-operation deadline in milliseconds; `0` for none
        pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
            self.window.timeout_ms = Some(timeout_ms);
            self
        }
    };
}

/// Pull pattern given as EDN text or already parsed
#[derive(Debug, Clone, PartialEq)]
pub enum PatternSpec {
    Text(String),
    Parsed(PullPattern),
}

impl PatternSpec {
    fn resolve(self) -> Result<PullPattern> {
        match self {
            PatternSpec::Text(text) => parse_pattern(&text),
            PatternSpec::Parsed(pattern) => Ok(pattern),
        }
    }
}

impl From<&str> for PatternSpec {
    fn from(s: &str) -> Self {
        PatternSpec::Text(s.to_string())
    }
}

impl From<PullPattern> for PatternSpec {
    fn from(p: PullPattern) -> Self {
        PatternSpec::Parsed(p)
    }
}

/// Arguments of [`Db::datoms`](crate::db::Db::datoms)
#[derive(Debug, Clone, PartialEq)]
pub struct DatomsArgs {
    index: IndexOrder,
    components: Vec<Value>,
    window: Window,
}

impl DatomsArgs {
    pub fn new(index: IndexOrder) -> Self {
        Self {
            index,
            components: Vec::new(),
            window: Window::default(),
        }
    }

    /// Append the next key component
    pub fn component(mut self, component: impl Into<Value>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Append an attribute (or ident) component
    pub fn keyword(self, keyword: &str) -> Self {
        self.component(Keyword::new(keyword))
    }

    window_setters!();

    pub(crate) fn into_request(self, config: &ClientConfig) -> Result<DatomsRequest> {
        if self.components.len() > 4 {
            return Err(Error::InvalidArgument(format!(
                "at most 4 components, got {}",
                self.components.len()
            )));
        }
        if self.components.is_empty() && self.window.limit != Some(-1) {
            return Err(Error::InvalidArgument(
                "datoms without components scans the whole database; set limit to -1".to_string(),
            ));
        }
        Ok(DatomsRequest {
            index: self.index,
            page: self.window.page(config)?,
            timeout: self.window.timeout(config),
            components: self.components,
        })
    }
}

/// Arguments of [`Db::index_range`](crate::db::Db::index_range)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRangeArgs {
    attribute: Value,
    start: Option<Value>,
    end: Option<Value>,
    window: Window,
}

impl IndexRangeArgs {
    /// Range over the values of `attribute` (e.g. `:movie/title`)
    pub fn new(attribute: &str) -> Self {
        Self::for_attribute(Keyword::new(attribute))
    }

    /// Range over an attribute given by ident or id
    pub fn for_attribute(attribute: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            start: None,
            end: None,
            window: Window::default(),
        }
    }

    /// Inclusive lower bound
    pub fn start(mut self, start: impl Into<Value>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Exclusive upper bound
    pub fn end(mut self, end: impl Into<Value>) -> Self {
        self.end = Some(end.into());
        self
    }

    window_setters!();

    pub(crate) fn into_request(self, config: &ClientConfig) -> Result<IndexRangeRequest> {
        Ok(IndexRangeRequest {
            page: self.window.page(config)?,
            timeout: self.window.timeout(config),
            attribute: self.attribute,
            range: ValueRange::new(self.start, self.end),
        })
    }
}

/// Arguments of [`Db::pull`](crate::db::Db::pull)
#[derive(Debug, Clone, PartialEq)]
pub struct PullArgs {
    pattern: PatternSpec,
    entity: EntityRef,
    window: Window,
}

impl PullArgs {
    pub fn new(pattern: impl Into<PatternSpec>, entity: impl Into<EntityRef>) -> Self {
        Self {
            pattern: pattern.into(),
            entity: entity.into(),
            window: Window::default(),
        }
    }

    window_setters!();

    pub(crate) fn into_request(self, config: &ClientConfig) -> Result<PullRequest> {
        if let EntityRef::TempId(tid) = &self.entity {
            return Err(Error::InvalidArgument(format!(
                "pull needs an entity id, ident or lookup ref, got temp id {tid:?}"
            )));
        }
        Ok(PullRequest {
            page: self.window.page(config)?,
            timeout: self.window.timeout(config),
            pattern: self.pattern.resolve()?,
            entity: self.entity,
        })
    }
}

/// Start key of an index pull, as EDN text or values
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorSpec {
    Text(String),
    Values(Vec<Value>),
}

impl From<&str> for SelectorSpec {
    fn from(s: &str) -> Self {
        SelectorSpec::Text(s.to_string())
    }
}

impl From<Vec<Value>> for SelectorSpec {
    fn from(v: Vec<Value>) -> Self {
        SelectorSpec::Values(v)
    }
}

/// Arguments of [`Db::index_pull`](crate::db::Db::index_pull)
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPullArgs {
    index: IndexOrder,
    pattern: PatternSpec,
    start: SelectorSpec,
    reverse: bool,
    window: Window,
}

impl IndexPullArgs {
    pub fn new(
        index: IndexOrder,
        pattern: impl Into<PatternSpec>,
        start: impl Into<SelectorSpec>,
    ) -> Self {
        Self {
            index,
            pattern: pattern.into(),
            start: start.into(),
            reverse: false,
            window: Window::default(),
        }
    }

    /// Walk the index backwards from the start key
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    window_setters!();

    pub(crate) fn into_request(self, config: &ClientConfig) -> Result<IndexPullRequest> {
        if !matches!(self.index, IndexOrder::Avet | IndexOrder::Aevt) {
            return Err(Error::InvalidArgument(format!(
                "index-pull walks :avet or :aevt, not {}",
                self.index
            )));
        }
        let start = match self.start {
            SelectorSpec::Text(text) => parse_selector(&text)?,
            SelectorSpec::Values(values) => values,
        };
        if !matches!(start.first(), Some(Value::Keyword(_)) | Some(Value::Long(_)) | Some(Value::Ref(_))) {
            return Err(Error::InvalidArgument(
                "index-pull start must begin with an attribute".to_string(),
            ));
        }
        Ok(IndexPullRequest {
            index: self.index,
            page: self.window.page(config)?,
            timeout: self.window.timeout(config),
            pattern: self.pattern.resolve()?,
            start,
            reverse: self.reverse,
        })
    }
}

/// Arguments of [`Connection::tx_range`](crate::connection::Connection::tx_range)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TxRangeArgs {
    start: Option<TimePoint>,
    end: Option<TimePoint>,
    limit: Option<i64>,
}

impl TxRangeArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive start; a `t`, tx id or instant
    pub fn start(mut self, start: impl Into<TimePoint>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Exclusive end; `0` means through the latest transaction
    pub fn end(mut self, end: impl Into<TimePoint>) -> Self {
        self.end = Some(end.into());
        self
    }

    /// Cap on transactions returned; `-1` for all
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validated `(start, end, limit)`; an end of `0` becomes unbounded
    pub(crate) fn resolve(self) -> Result<(Option<TimePoint>, Option<TimePoint>, Limit)> {
        let limit = Limit::from_raw(self.limit.unwrap_or(-1))?;
        let end = match self.end {
            Some(TimePoint::T(0)) => None,
            other => other,
        };
        Ok((self.start, end, limit))
    }
}

/// One query input before resolution
#[derive(Debug, Clone)]
pub enum QueryArg {
    Db(crate::db::Db),
    Value(Value),
}

/// Arguments of a query, in positional or arg-map form
#[derive(Debug, Clone)]
pub struct QueryArgs {
    query: Query,
    pub(crate) inputs: Vec<QueryArg>,
    window: Window,
}

impl QueryArgs {
    pub fn new(query: impl Into<Query>) -> Self {
        Self {
            query: query.into(),
            inputs: Vec::new(),
            window: Window::default(),
        }
    }

    /// Read an arg map: `{"query": .., "args": [..], "limit": n, "offset": n,
    /// "timeout": ms}`. Database inputs are added with [`QueryArgs::db`].
    pub fn from_arg_map(map: &serde_json::Value) -> Result<Self> {
        let obj = map
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("arg map must be an object".to_string()))?;
        let query = match obj.get("query") {
            Some(serde_json::Value::String(text)) => Query::Text(text.clone()),
            Some(data) => Query::Data(data.clone()),
            None => return Err(Error::InvalidArgument("arg map is missing :query".to_string())),
        };
        let mut args = Self::new(query);

        if let Some(inputs) = obj.get("args") {
            let inputs: Vec<Value> = serde_json::from_value(inputs.clone())
                .map_err(|e| Error::InvalidArgument(format!("invalid :args: {e}")))?;
            args.inputs.extend(inputs.into_iter().map(QueryArg::Value));
        }
        let number = |key: &str| -> Result<Option<i64>> {
            match obj.get(key) {
                None => Ok(None),
                Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                    Error::InvalidArgument(format!(":{key} must be an integer, got {v}"))
                }),
            }
        };
        args.window.limit = number("limit")?;
        if let Some(offset) = number("offset")? {
            args.window.offset = usize::try_from(offset)
                .map_err(|_| Error::InvalidArgument(format!(":offset must be >= 0, got {offset}")))?;
        }
        if let Some(timeout) = number("timeout")? {
            args.window.timeout_ms = Some(u64::try_from(timeout).map_err(|_| {
                Error::InvalidArgument(format!(":timeout must be >= 0, got {timeout}"))
            })?);
        }
        Ok(args)
    }

    /// Append a database input
    pub fn db(mut self, db: &crate::db::Db) -> Self {
        self.inputs.push(QueryArg::Db(db.clone()));
        self
    }

    /// Append a scalar input
    pub fn input(mut self, value: impl Into<Value>) -> Self {
        self.inputs.push(QueryArg::Value(value.into()));
        self
    }

    window_setters!();

    pub(crate) fn into_request(self, config: &ClientConfig) -> Result<QueryRequest> {
        if matches!(&self.query, Query::Text(text) if text.trim().is_empty()) {
            return Err(Error::InvalidArgument("query is empty".to_string()));
        }
        let page = self.window.page(config)?;
        let inputs = self
            .inputs
            .into_iter()
            .map(|arg| match arg {
                QueryArg::Db(db) => QueryInput::Db(db.view().clone()),
                QueryArg::Value(value) => QueryInput::Value(value),
            })
            .collect();
        Ok(QueryRequest {
            query: self.query,
            inputs,
            page,
            timeout: self.window.timeout(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::datom::EntityId;

    fn config() -> ClientConfig {
        ClientConfig::default()
    }

    #[test]
    fn test_zero_components_need_explicit_unbounded_limit() {
        let err = DatomsArgs::new(IndexOrder::Eavt).into_request(&config()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = DatomsArgs::new(IndexOrder::Eavt)
            .limit(0)
            .into_request(&config())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let request = DatomsArgs::new(IndexOrder::Eavt)
            .limit(-1)
            .into_request(&config())
            .unwrap();
        assert_eq!(request.page, Page::all());
    }

    #[test]
    fn test_limit_zero_is_rejected_everywhere() {
        let err = IndexRangeArgs::new(":movie/title")
            .limit(0)
            .into_request(&config())
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidArgument("limit can't be 0. Set limit to -1 to retrieve all".to_string())
        );
        assert!(PullArgs::new("[*]", EntityRef::Id(1000.into()))
            .limit(0)
            .into_request(&config())
            .is_err());
        assert!(TxRangeArgs::new().limit(0).resolve().is_err());
    }

    #[test]
    fn test_timeouts_fall_back_to_config() {
        let mut config = config();
        config.timeout = Some(Duration::from_millis(500));

        let request = IndexRangeArgs::new(":movie/title").into_request(&config).unwrap();
        assert_eq!(request.timeout, Some(Duration::from_millis(500)));
        assert_eq!(request.page.limit, Limit::At(1000));

        let request = IndexRangeArgs::new(":movie/title")
            .timeout_ms(0)
            .into_request(&config)
            .unwrap();
        assert_eq!(request.timeout, None);
    }

    #[test]
    fn test_bad_pull_pattern_fails_before_the_service() {
        let err = PullArgs::new("[:movie/title", ":movie/title")
            .into_request(&config())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_index_pull_parses_selector() {
        let request = IndexPullArgs::new(
            IndexOrder::Avet,
            "[:movie/title]",
            "[:movie/release-year 1985]",
        )
        .reverse(true)
        .into_request(&config())
        .unwrap();
        assert_eq!(request.start[1], Value::Long(1985));
        assert!(request.reverse);

        let err = IndexPullArgs::new(IndexOrder::Eavt, "[*]", "[:movie/title]")
            .into_request(&config())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_tx_range_zero_end_is_unbounded() {
        let (start, end, limit) = TxRangeArgs::new().start(4u64).end(0u64).resolve().unwrap();
        assert_eq!(start, Some(TimePoint::T(4)));
        assert_eq!(end, None);
        assert_eq!(limit, Limit::Unbounded);
    }

    #[test]
    fn test_arg_map_marshaling() {
        let args = QueryArgs::from_arg_map(&serde_json::json!({
            "query": "[:find ?e :where [?e :movie/title]]",
            "args": ["Commando", {"keyword": ":movie/title"}, {"ref": 17592186045418u64}],
            "limit": 2,
            "offset": 1,
            "timeout": 100,
        }))
        .unwrap()
        .into_request(&config())
        .unwrap();
        assert_eq!(args.page, Page::new(1, Limit::At(2)));
        assert_eq!(args.timeout, Some(Duration::from_millis(100)));
        assert_eq!(
            args.inputs,
            vec![
                QueryInput::Value(Value::from("Commando")),
                QueryInput::Value(Value::Keyword(Keyword::new("movie/title"))),
                QueryInput::Value(Value::Ref(EntityId(17592186045418))),
            ]
        );

        let err = QueryArgs::from_arg_map(&serde_json::json!({"query": "q", "limit": "ten"}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(QueryArgs::from_arg_map(&serde_json::json!({"limit": 1})).is_err());
        assert!(QueryArgs::new("  ").into_request(&config()).is_err());
    }
}
