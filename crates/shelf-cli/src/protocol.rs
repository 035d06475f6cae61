//! Line protocol: one JSON request per line, one JSON response per line.
//!
//! Requests are decoded into [`Request`] before anything else runs, so a
//! malformed line never reaches a guard or the store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use shelf_core::{
    ItemQuery, MediaCondition, MediaFormat, NewItem, Shelf, ShelfError, SortOrder, VERSION,
};

/// Wire kind for requests that fail to decode.
pub const INVALID_REQUEST: &str = "invalid_request";

/// A password as received on the wire, wiped on drop.
pub struct Secret(Zeroizing<String>);

impl Secret {
    fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|value| Secret(Zeroizing::new(value)))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Register {
        username: String,
        password: Secret,
    },
    Login {
        username: String,
        password: Secret,
    },
    Logout,
    Whoami,
    ListItems {
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        format: Option<MediaFormat>,
        #[serde(default)]
        sort: Option<SortOrder>,
    },
    AddItem {
        title: String,
        format: MediaFormat,
        #[serde(default)]
        barcode: Option<String>,
        condition: MediaCondition,
    },
    RemoveItem {
        id: i64,
    },
    ListUsers,
    ResetPassword {
        user_id: i64,
        new_password: Secret,
    },
    ExportStore,
    ImportStore {
        filename: String,
        data: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    token: Option<String>,
}

/// Failure to turn a line into a request or to run it.
#[derive(Debug)]
pub enum Failure {
    Invalid(String),
    Shelf(ShelfError),
}

impl From<ShelfError> for Failure {
    fn from(err: ShelfError) -> Self {
        Failure::Shelf(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

/// Decode a request line into its token and typed request.
pub fn decode(line: &str) -> Result<(Option<String>, Request), Failure> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Failure::Invalid(format!("Malformed JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Failure::Invalid("Request must be a JSON object".to_string()));
    }
    let envelope = Envelope::deserialize(&value)
        .map_err(|e| Failure::Invalid(format!("Invalid token: {}", e)))?;
    let request = Request::deserialize(&value)
        .map_err(|e| Failure::Invalid(format!("Invalid request: {}", e)))?;
    Ok((envelope.token, request))
}

/// Run one request line and render the response line (without newline).
pub fn handle_line(shelf: &Shelf, line: &str) -> String {
    let outcome =
        decode(line).and_then(|(token, request)| dispatch(shelf, token.as_deref(), request));
    render(outcome)
}

/// Response line for input rejected before it could be decoded.
pub fn invalid_response(message: impl Into<String>) -> String {
    render(Err(Failure::Invalid(message.into())))
}

fn render(outcome: Result<Value, Failure>) -> String {
    let response = match outcome {
        Ok(data) => json!({ "ok": true, "data": data }),
        Err(failure) => {
            let body = match failure {
                Failure::Invalid(message) => ErrorBody {
                    kind: INVALID_REQUEST,
                    message,
                },
                Failure::Shelf(err) => ErrorBody {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            };
            json!({ "ok": false, "error": body })
        }
    };
    response.to_string()
}

fn to_value<T: Serialize>(value: T) -> Result<Value, Failure> {
    serde_json::to_value(value)
        .map_err(|e| Failure::Shelf(ShelfError::Storage(format!("Serialization error: {}", e))))
}

fn dispatch(shelf: &Shelf, token: Option<&str>, request: Request) -> Result<Value, Failure> {
    match request {
        Request::Ping => Ok(json!({
            "version": VERSION,
            "state": shelf.lifecycle_state()
        })),
        Request::Register { username, password } => {
            let user = shelf.register(&username, password.expose())?;
            to_value(user)
        }
        Request::Login { username, password } => {
            let login = shelf.login(&username, password.expose())?;
            Ok(json!({ "token": login.token, "user": login.identity }))
        }
        Request::Logout => {
            shelf.logout(token);
            Ok(Value::Null)
        }
        Request::Whoami => to_value(shelf.whoami(token)?),
        Request::ListItems {
            search,
            format,
            sort,
        } => {
            let mut query = ItemQuery::new();
            if let Some(search) = search {
                query = query.search(search);
            }
            if let Some(format) = format {
                query = query.format(format);
            }
            if let Some(sort) = sort {
                query = query.sort(sort);
            }
            to_value(shelf.list_items(token, &query)?)
        }
        Request::AddItem {
            title,
            format,
            barcode,
            condition,
        } => {
            let mut item = NewItem::new(title, format, condition);
            if let Some(barcode) = barcode {
                item = item.with_barcode(barcode);
            }
            to_value(shelf.add_item(token, &item)?)
        }
        Request::RemoveItem { id } => {
            shelf.remove_item(token, id)?;
            Ok(Value::Null)
        }
        Request::ListUsers => to_value(shelf.list_users(token)?),
        Request::ResetPassword {
            user_id,
            new_password,
        } => {
            let user = shelf.reset_password(token, user_id, new_password.expose())?;
            to_value(user)
        }
        Request::ExportStore => {
            let bytes = shelf.export_store(token)?;
            Ok(json!({ "filename": "shelf.db", "data": STANDARD.encode(&bytes) }))
        }
        Request::ImportStore { filename, data } => {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| Failure::Invalid(format!("Invalid base64 data: {}", e)))?;
            to_value(shelf.import_store(token, &filename, &bytes)?)
        }
    }
}
