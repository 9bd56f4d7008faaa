use datagovmy::api::{CancellationToken, QueryOptions, Source};
use datagovmy::catalog::{DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT};
use datagovmy::{DataGovMyClient, DataGovMyConfig, DataGovMyError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, mpsc};

const SERVER_NAME: &str = "datagovmy-mcp-server";
const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct DataGovMyMcpServer {
    client: DataGovMyClient,
    /// Cancellation tokens of requests still being handled, keyed by JSON id
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl DataGovMyMcpServer {
    pub async fn bootstrap() -> Result<(), ServerError> {
        let server = Arc::new(Self::new()?);
        server.run(io::stdin(), io::stdout()).await
    }

    fn new() -> Result<Self, ServerError> {
        let mut config = DataGovMyConfig::new();
        if let Ok(url) = env::var("DATAGOVMY_OPENDOSM_URL") {
            config = config.with_opendosm_url(url);
        }
        if let Ok(url) = env::var("DATAGOVMY_DATA_CATALOGUE_URL") {
            config = config.with_data_catalogue_url(url);
        }
        if let Ok(ua) = env::var("DATAGOVMY_USER_AGENT") {
            config = config.with_user_agent(ua);
        }
        if let Ok(raw) = env::var("DATAGOVMY_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                DataGovMyError::config_error(format!(
                    "DATAGOVMY_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            config = config.with_timeout(secs);
        }
        if let Ok(path) = env::var("DATAGOVMY_INDEX_PATH") {
            config = config.with_index_path(path);
        }

        let client = DataGovMyClient::with_config(config)?;
        Ok(Self::with_client(client))
    }

    fn with_client(client: DataGovMyClient) -> Self {
        Self {
            client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Serve newline-delimited JSON-RPC until `input` reaches EOF.
    ///
    /// Every request runs on its own task; responses are funnelled through a
    /// single writer so lines never interleave. Requests still running at EOF
    /// are allowed to finish.
    async fn run<R, W>(self: Arc<Self>, input: R, output: W) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Response>();
        let writer = tokio::spawn(write_responses(rx, BufWriter::new(output)));

        tracing::info!(
            datasets = self.client.index().len(),
            "datagovmy MCP server ready"
        );

        let mut lines = BufReader::new(input).lines();

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match parse_request(trimmed) {
                Ok(request) => request,
                Err(err) => {
                    tracing::warn!("invalid request: {err}");
                    if tx.send(Response::error(None, err)).is_err() {
                        tracing::warn!("response writer closed, stopping");
                        break;
                    }
                    continue;
                }
            };

            let Some(id) = request.id.clone() else {
                self.handle_notification(request).await;
                continue;
            };

            let key = id.to_string();
            let token = CancellationToken::new();
            let duplicate = match self.in_flight.lock().await.entry(key.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(token.clone());
                    false
                }
            };
            if duplicate {
                tracing::warn!(id = %key, "request id already in flight");
                let err = ServerError::InvalidRequest(format!("request id {key} is already in flight"));
                if tx.send(Response::error(Some(id), err)).is_err() {
                    tracing::warn!("response writer closed, stopping");
                    break;
                }
                continue;
            }

            let server = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = server.handle_request(request, &token).await;
                server.in_flight.lock().await.remove(&key);

                if token.is_cancelled() {
                    tracing::debug!(id = %key, "request cancelled, response dropped");
                    return;
                }
                if tx.send(response).is_err() {
                    tracing::warn!(id = %key, "response writer closed, response dropped");
                }
            });
        }

        drop(tx);
        writer.await??;
        tracing::info!("input closed, datagovmy MCP server stopping");

        Ok(())
    }

    async fn handle_notification(&self, request: Request) {
        match request.method.as_str() {
            "notifications/cancelled" => {
                let params: CancelledParams = match parse_required_params(&request.method, request.params) {
                    Ok(params) => params,
                    Err(err) => {
                        tracing::warn!("ignoring malformed cancellation: {err}");
                        return;
                    }
                };
                let key = params.request_id.to_string();
                match self.in_flight.lock().await.get(&key) {
                    Some(token) => {
                        tracing::info!(
                            id = %key,
                            reason = params.reason.as_deref().unwrap_or("unspecified"),
                            "cancelling request"
                        );
                        token.cancel();
                    }
                    None => tracing::debug!(id = %key, "cancellation for unknown request"),
                }
            }
            "notifications/initialized" | "initialized" => {
                tracing::debug!("client initialized");
            }
            other => tracing::debug!("ignoring notification {other}"),
        }
    }

    async fn handle_request(&self, request: Request, token: &CancellationToken) -> Response {
        match self.dispatch(&request.method, request.params, token).await {
            Ok(result) => Response::success(request.id, result),
            Err(err) => Response::error(request.id, err),
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        token: &CancellationToken,
    ) -> Result<Value, ServerError> {
        match method {
            "initialize" => {
                let params: InitializeParams = parse_optional_params(method, params)?;
                if let Some(info) = params.client_info {
                    tracing::info!(
                        client = %info.name,
                        version = info.version.as_deref().unwrap_or("unknown"),
                        requested_protocol = params.protocol_version.as_deref().unwrap_or("none"),
                        "client connected"
                    );
                }
                to_json(&InitializeResult::new())
            }
            "initialized" | "shutdown" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let params: ListToolsParams = parse_optional_params(method, params)?;
                let _ = params.cursor;
                let result = ListToolsResult {
                    tools: tool_descriptors(),
                    next_cursor: None,
                };
                to_json(&result)
            }
            "tools/call" => {
                let params: CallToolParams = parse_required_params(method, params)?;
                let response = self.call_tool(&params.name, params.arguments, token).await;
                to_json(&response)
            }
            other => Err(ServerError::InvalidMethod(other.to_string())),
        }
    }

    /// Run a tool; failures become error content instead of JSON-RPC errors.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        token: &CancellationToken,
    ) -> ToolResponse {
        let context = error_context(name, arguments.as_ref());

        match self.invoke_tool(name, arguments, token).await {
            Ok(value) => ToolResponse::from_value(&value),
            Err(err) => {
                tracing::warn!(tool = name, "tool call failed: {err}");
                ToolResponse::from_error(&err, context)
            }
        }
    }

    async fn invoke_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        token: &CancellationToken,
    ) -> ServerResult<Value> {
        match name {
            "query_opendosm" => {
                self.query_source(Source::OpenDosm, name, arguments, token)
                    .await
            }
            "query_data_catalogue" => {
                self.query_source(Source::DataCatalogue, name, arguments, token)
                    .await
            }
            "get_dataset_metadata" => {
                let params: DatasetSourceParams = parse_required_params(name, arguments)?;
                let source = parse_source(&params.source)?;
                let metadata = self
                    .client
                    .get_dataset_metadata_with_cancellation(&params.dataset_id, source, token)
                    .await?;
                Ok(metadata)
            }
            "list_datasets" => {
                let params: ListDatasetsParams = parse_optional_params(name, arguments)?;
                let source = params.source.as_deref().map(parse_source).transpose()?;
                let page = self.client.list_datasets(
                    source,
                    params.category.as_deref(),
                    params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
                    params.offset.unwrap_or(0),
                );
                to_json(&page)
            }
            "search_datasets" => {
                let params: SearchDatasetsParams = parse_required_params(name, arguments)?;
                let source = params.source.as_deref().map(parse_source).transpose()?;
                let hits = self.client.search_datasets(
                    &params.query,
                    source,
                    params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                );
                Ok(json!({
                    "query": params.query,
                    "count": hits.len(),
                    "results": to_json(&hits)?,
                }))
            }
            "get_dataset_schema" => {
                let params: DatasetSourceParams = parse_required_params(name, arguments)?;
                let source = parse_source(&params.source)?;
                let schema = self
                    .client
                    .get_dataset_schema_with_cancellation(&params.dataset_id, source, token)
                    .await?;
                to_json(&schema)
            }
            other => Err(ServerError::UnknownTool(other.to_string())),
        }
    }

    async fn query_source(
        &self,
        source: Source,
        tool: &str,
        arguments: Option<Value>,
        token: &CancellationToken,
    ) -> ServerResult<Value> {
        let params: QueryParams = parse_required_params(tool, arguments)?;
        let filters = parse_filters(params.filters)?;
        let options = QueryOptions::new()
            .with_limit(params.limit.unwrap_or(QueryOptions::DEFAULT_LIMIT))
            .with_offset(params.offset.unwrap_or(0))
            .with_filters(filters);

        let data = self
            .client
            .query_with_cancellation(source, &params.dataset_id, &options, token)
            .await?;
        Ok(data)
    }
}

async fn write_responses<W>(
    mut rx: mpsc::UnboundedReceiver<Response>,
    mut writer: BufWriter<W>,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let payload = serde_json::to_string(&response).map_err(ServerError::Serialization)?;
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default, rename = "jsonrpc")]
    _jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl Response {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, error: ServerError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError::from(error)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl From<ServerError> for ResponseError {
    fn from(err: ServerError) -> Self {
        let code = match err {
            ServerError::InvalidRequest(_) => -32600,
            ServerError::InvalidMethod(_) => -32601,
            ServerError::InvalidParams(_)
            | ServerError::InvalidFilters(_)
            | ServerError::UnknownTool(_) => -32602,
            ServerError::Json(_) => -32700,
            ServerError::Io(_) => -32020,
            ServerError::DataGovMy(_) => -32010,
            ServerError::Task(_) | ServerError::Serialization(_) => -32603,
        };

        Self {
            code,
            message: err.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unknown method: {0}")]
    InvalidMethod(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid filters: {0}")]
    InvalidFilters(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    DataGovMy(#[from] DataGovMyError),
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("serialization error: {0}")]
    Serialization(serde_json::Error),
}

type ServerResult<T> = Result<T, ServerError>;

fn parse_request(line: &str) -> ServerResult<Request> {
    let value: Value = serde_json::from_str(line)?;
    serde_json::from_value(value).map_err(|err| ServerError::InvalidRequest(err.to_string()))
}

fn parse_required_params<T>(method: &str, params: Option<Value>) -> ServerResult<T>
where
    T: DeserializeOwned,
{
    match params {
        Some(value) => serde_json::from_value(value)
            .map_err(|err| ServerError::InvalidParams(format!("{method}: {err}"))),
        None => Err(ServerError::InvalidParams(format!(
            "{method}: missing parameters"
        ))),
    }
}

fn parse_optional_params<T>(method: &str, params: Option<Value>) -> ServerResult<T>
where
    T: DeserializeOwned + Default,
{
    match params {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|err| ServerError::InvalidParams(format!("{method}: {err}"))),
    }
}

fn parse_source(raw: &str) -> ServerResult<Source> {
    raw.parse::<Source>()
        .map_err(|err| ServerError::DataGovMy(err.into()))
}

/// Filters arrive either as an object or as a JSON-encoded object string.
fn parse_filters(filters: Option<Value>) -> ServerResult<Map<String, Value>> {
    match filters {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ServerError::InvalidFilters(
                "filters must be a JSON object".to_string(),
            )),
            Err(err) => Err(ServerError::InvalidFilters(err.to_string())),
        },
        Some(_) => Err(ServerError::InvalidFilters(
            "filters must be a JSON object".to_string(),
        )),
    }
}

/// Identifying arguments echoed back alongside a tool error.
fn error_context(tool: &str, arguments: Option<&Value>) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("tool".to_string(), Value::from(tool));
    if let Some(Value::Object(args)) = arguments {
        for key in ["dataset_id", "source"] {
            if let Some(value) = args.get(key) {
                context.insert(key.to_string(), value.clone());
            }
        }
    }
    context
}

fn to_json<T: Serialize>(value: &T) -> ServerResult<Value> {
    serde_json::to_value(value).map_err(ServerError::Serialization)
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    dataset_id: String,
    #[serde(default)]
    filters: Option<Value>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DatasetSourceParams {
    dataset_id: String,
    source: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListDatasetsParams {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchDatasetsParams {
    query: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CancelledParams {
    #[serde(rename = "requestId")]
    request_id: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InitializeParams {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
    #[serde(default, rename = "clientInfo")]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: &'static str,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
    capabilities: Value,
}

impl InitializeResult {
    fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            server_info: ServerInfo {
                name: SERVER_NAME,
                version: env!("CARGO_PKG_VERSION"),
            },
            capabilities: json!({
                "tools": {
                    "listChanged": false
                }
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ListToolsParams {
    #[serde(default, rename = "cursor")]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug)]
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct ListToolsResult {
    tools: Vec<ToolDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolDescriptor {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct ToolResponse {
    content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "isError")]
    is_error: Option<bool>,
}

impl ToolResponse {
    fn from_value(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: None,
        }
    }

    fn from_error(err: &ServerError, mut context: Map<String, Value>) -> Self {
        context.insert("error".to_string(), Value::from(err.to_string()));
        let body = Value::Object(context);
        let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: Some(true),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

fn tool_descriptors() -> Vec<ToolDescriptor> {
    tool_specs()
        .into_iter()
        .map(|spec| ToolDescriptor {
            name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
        })
        .collect()
}

fn query_schema(example_id: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "dataset_id": {"type": "string", "description": format!("Dataset ID to query, e.g. '{example_id}'")},
            "filters": {
                "type": ["object", "string", "null"],
                "description": "Filter parameters as an object or JSON string, e.g. {\"date\": \"2024-01-01\"}"
            },
            "limit": {"type": "integer", "description": "Maximum number of records to return (default 100)"},
            "offset": {"type": "integer", "description": "Number of records to skip for pagination (default 0)"}
        },
        "required": ["dataset_id"],
        "additionalProperties": false
    })
}

fn dataset_source_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dataset_id": {"type": "string", "description": "Dataset ID"},
            "source": {"type": "string", "enum": ["opendosm", "data_catalogue"], "description": "Which API the dataset belongs to"}
        },
        "required": ["dataset_id", "source"],
        "additionalProperties": false
    })
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "query_opendosm",
            description: "Query an OpenDOSM (Department of Statistics Malaysia) dataset with optional filters and pagination",
            input_schema: query_schema("cpi_core"),
        },
        ToolSpec {
            name: "query_data_catalogue",
            description: "Query a Malaysian government Data Catalogue dataset with optional filters and pagination",
            input_schema: query_schema("fuelprice"),
        },
        ToolSpec {
            name: "get_dataset_metadata",
            description: "Get metadata for a dataset (columns, types, descriptions) without fetching data records",
            input_schema: dataset_source_schema(),
        },
        ToolSpec {
            name: "list_datasets",
            description: "List known datasets, optionally filtered by source and category",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source": {"type": "string", "enum": ["opendosm", "data_catalogue"], "description": "Only list datasets from this source"},
                    "category": {"type": "string", "description": "Only list datasets in this category, e.g. Prices (case-insensitive)"},
                    "limit": {"type": "integer", "minimum": 0, "description": "Maximum number of datasets to return (default 100)"},
                    "offset": {"type": "integer", "minimum": 0, "description": "Number of datasets to skip (default 0)"}
                },
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "search_datasets",
            description: "Search known datasets by keyword across IDs, names, descriptions and keywords",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search term, e.g. inflation"},
                    "source": {"type": "string", "enum": ["opendosm", "data_catalogue"], "description": "Only search this source"},
                    "limit": {"type": "integer", "minimum": 0, "description": "Maximum number of results (default 10)"}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "get_dataset_schema",
            description: "Describe a dataset: catalogue entry, upstream metadata and three sample rows",
            input_schema: dataset_source_schema(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagovmy::DatasetIndex;
    use datagovmy::api::{ApiClient, Configuration};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_server(server: &MockServer) -> Arc<DataGovMyMcpServer> {
        let config = DataGovMyConfig::new()
            .with_opendosm_url(format!("{}/opendosm", server.uri()))
            .with_data_catalogue_url(format!("{}/data-catalogue", server.uri()));
        let client = DataGovMyClient::with_config(config).expect("client should build");
        Arc::new(DataGovMyMcpServer::with_client(client))
    }

    async fn call(server: &DataGovMyMcpServer, name: &str, arguments: Value) -> Value {
        server
            .dispatch(
                "tools/call",
                Some(json!({"name": name, "arguments": arguments})),
                &CancellationToken::new(),
            )
            .await
            .expect("tools/call should always produce a result")
    }

    fn text_of(result: &Value) -> &str {
        result["content"][0]["text"].as_str().expect("text content")
    }

    fn is_error(result: &Value) -> bool {
        result["isError"].as_bool().unwrap_or(false)
    }

    #[tokio::test]
    async fn tools_list_exposes_all_tools() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let result = server
            .dispatch("tools/list", None, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();

        assert_eq!(
            names,
            vec![
                "query_opendosm",
                "query_data_catalogue",
                "get_dataset_metadata",
                "list_datasets",
                "search_datasets",
                "get_dataset_schema",
            ]
        );
        assert!(result["tools"][0]["inputSchema"]["properties"]["dataset_id"].is_object());
    }

    #[tokio::test]
    async fn every_listed_tool_is_dispatched() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        for spec in tool_specs() {
            let result = call(&server, spec.name, json!({})).await;
            assert!(
                !text_of(&result).contains("Unknown tool"),
                "{} is listed but not dispatched",
                spec.name
            );
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_error_content() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let result = call(&server, "query_census", json!({"dataset_id": "x"})).await;
        assert!(is_error(&result));

        let body: Value = serde_json::from_str(text_of(&result)).unwrap();
        assert_eq!(body["error"], "Unknown tool: query_census");
        assert_eq!(body["tool"], "query_census");
        assert_eq!(body["dataset_id"], "x");
    }

    #[tokio::test]
    async fn invalid_source_names_accepted_values() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        for tool in ["get_dataset_metadata", "get_dataset_schema"] {
            let result = call(&server, tool, json!({"dataset_id": "gdp", "source": "dosm"})).await;
            assert!(is_error(&result));

            let body: Value = serde_json::from_str(text_of(&result)).unwrap();
            let message = body["error"].as_str().unwrap();
            assert!(message.contains("'opendosm'"));
            assert!(message.contains("'data_catalogue'"));
            assert_eq!(body["source"], "dosm");
        }

        let result = call(&server, "list_datasets", json!({"source": "bnm"})).await;
        assert!(is_error(&result));
    }

    #[tokio::test]
    async fn malformed_filters_are_a_parse_error() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let result = call(
            &server,
            "query_opendosm",
            json!({"dataset_id": "cpi_core", "filters": "{date: 2024"}),
        )
        .await;
        assert!(is_error(&result));
        assert!(text_of(&result).contains("invalid filters"));

        let result = call(
            &server,
            "query_opendosm",
            json!({"dataset_id": "cpi_core", "filters": "[1, 2]"}),
        )
        .await;
        assert!(is_error(&result));
        assert!(text_of(&result).contains("JSON object"));
    }

    #[tokio::test]
    async fn query_tool_forwards_string_filters() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opendosm"))
            .and(query_param("id", "cpi_core"))
            .and(query_param("limit", "5"))
            .and(query_param("offset", "0"))
            .and(query_param("date", "2024-01-01"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"date": "2024-01-01", "index": 131.9}])),
            )
            .expect(1)
            .mount(&mock)
            .await;
        let server = test_server(&mock);

        let result = call(
            &server,
            "query_opendosm",
            json!({"dataset_id": "cpi_core", "filters": "{\"date\": \"2024-01-01\"}", "limit": 5}),
        )
        .await;

        assert!(!is_error(&result));
        let data: Value = serde_json::from_str(text_of(&result)).unwrap();
        assert_eq!(data, json!([{"date": "2024-01-01", "index": 131.9}]));
    }

    #[tokio::test]
    async fn upstream_failure_is_error_content() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data-catalogue"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock)
            .await;
        let server = test_server(&mock);

        let result = call(&server, "query_data_catalogue", json!({"dataset_id": "nope"})).await;
        assert!(is_error(&result));

        let body: Value = serde_json::from_str(text_of(&result)).unwrap();
        assert!(body["error"].as_str().unwrap().contains("404 Not Found"));
        assert_eq!(body["dataset_id"], "nope");
    }

    #[tokio::test]
    async fn search_tool_ranks_injected_index() {
        let index: DatasetIndex = serde_json::from_value(json!({
            "opendosm": [
                {"id": "cpi_core", "name": "Core CPI", "category": "Prices", "keywords": ["inflation"]}
            ]
        }))
        .unwrap();
        let client = DataGovMyClient::from_parts(
            Arc::new(ApiClient::new(Arc::new(Configuration::default()))),
            Arc::new(index),
        );
        let server = DataGovMyMcpServer::with_client(client);

        let result = call(&server, "search_datasets", json!({"query": "inflation"})).await;
        let body: Value = serde_json::from_str(text_of(&result)).unwrap();

        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["id"], "cpi_core");
        assert_eq!(body["results"][0]["source"], "opendosm");
        assert_eq!(body["results"][0]["score"], 40);
    }

    #[tokio::test]
    async fn list_tool_filters_bundled_index() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let result = call(
            &server,
            "list_datasets",
            json!({"source": "data_catalogue", "category": "prices", "limit": 2}),
        )
        .await;
        let body: Value = serde_json::from_str(text_of(&result)).unwrap();

        assert_eq!(body["limit"], 2);
        assert_eq!(body["count"], 2);
        assert!(body["total"].as_u64().unwrap() >= 2);
        for record in body["records"].as_array().unwrap() {
            assert_eq!(record["source"], "data_catalogue");
            assert_eq!(record["category"], "Prices");
        }
    }

    #[tokio::test]
    async fn unknown_method_is_jsonrpc_error() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let err = server
            .dispatch("resources/list", None, &CancellationToken::new())
            .await
            .unwrap_err();
        let response = ResponseError::from(err);
        assert_eq!(response.code, -32601);
    }

    async fn run_session(server: Arc<DataGovMyMcpServer>, input: &str) -> Vec<Value> {
        let (mut output, server_end) = tokio::io::duplex(256 * 1024);
        tokio::time::timeout(Duration::from_secs(5), server.run(input.as_bytes(), server_end))
            .await
            .expect("session should end at EOF")
            .expect("session should succeed");

        let mut text = String::new();
        output.read_to_string(&mut text).await.unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).expect("each line is JSON"))
            .collect()
    }

    #[tokio::test]
    async fn session_answers_requests_but_not_notifications() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"test","version":"0.0.1"}}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "",
            r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#,
            "not json",
        ]
        .join("\n");

        let responses = run_session(server, &input).await;
        assert_eq!(responses.len(), 3);

        let by_id = |id: Value| {
            responses
                .iter()
                .find(|response| response["id"] == id)
                .unwrap_or_else(|| panic!("no response for {id}"))
        };

        let init = by_id(json!(1));
        assert_eq!(init["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

        let tools = by_id(json!("two"));
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 6);

        let parse_error = by_id(Value::Null);
        assert_eq!(parse_error["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn cancelled_request_gets_no_response() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opendosm"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&mock)
            .await;
        let server = test_server(&mock);

        let input = [
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"query_opendosm","arguments":{"dataset_id":"lfs_month"}}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":7,"reason":"user aborted"}}"#,
        ]
        .join("\n");

        let responses = run_session(Arc::clone(&server), &input).await;
        assert!(responses.is_empty());
        assert!(server.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn reused_in_flight_id_is_rejected() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opendosm"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"month": "2024-01"}]))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&mock)
            .await;
        let server = test_server(&mock);

        let input = [
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"query_opendosm","arguments":{"dataset_id":"lfs_month"}}}"#,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#,
        ]
        .join("\n");

        let responses = run_session(Arc::clone(&server), &input).await;
        assert_eq!(responses.len(), 2);

        // the rejection is written before the slow call completes
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["error"]["code"], -32600);
        assert!(
            responses[0]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("already in flight")
        );

        assert_eq!(responses[1]["id"], 7);
        assert!(!is_error(&responses[1]["result"]));
        assert!(text_of(&responses[1]["result"]).contains("2024-01"));
        assert!(server.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn closed_output_stops_the_read_loop() {
        let mock = MockServer::start().await;
        let server = test_server(&mock);

        let (mut client_in, server_in) = tokio::io::duplex(1024);
        let (client_out, server_out) = tokio::io::duplex(1024);
        drop(client_out);

        // input never reaches EOF while the server is reading it
        tokio::spawn(async move {
            while client_in.write_all(b"not json\n").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let result = tokio::time::timeout(Duration::from_secs(5), server.run(server_in, server_out))
            .await
            .expect("session should stop once output is gone");
        assert!(matches!(result, Err(ServerError::Io(_))));
    }

    #[test]
    fn envelope_errors_use_jsonrpc_codes() {
        let malformed = ResponseError::from(parse_request("{oops").unwrap_err());
        assert_eq!(malformed.code, -32700);

        let missing_method = ResponseError::from(parse_request(r#"{"id": 3}"#).unwrap_err());
        assert_eq!(missing_method.code, -32600);
    }

    #[test]
    fn filters_accept_objects_and_blank_strings() {
        let map = parse_filters(Some(json!({"state": "Selangor"}))).unwrap();
        assert_eq!(map.get("state"), Some(&json!("Selangor")));

        assert!(parse_filters(None).unwrap().is_empty());
        assert!(parse_filters(Some(json!(""))).unwrap().is_empty());
        assert!(parse_filters(Some(json!(42))).is_err());
    }
}
