//! The wire form of events.\
//! An envelope carries 'name', 'target', 'data', 'origin', 'sendid' and
//! 'hints'. The native form is XML (used for HTTP sends and the scxml POST
//! surface), the websocket form is JSON. Both parse back to an [Event].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datamodel::{event_data_value, Data};
use crate::fsm::{Event, EventType, ParamPair};

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename = "event")]
struct EventEnvelope {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@target", skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(rename = "@origin", skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(rename = "@sendid", skip_serializing_if = "Option::is_none")]
    sendid: Option<String>,
    #[serde(rename = "param", default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<EnvelopeParam>,
    #[serde(rename = "content", skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    /// JSON object text.
    #[serde(rename = "hints", skip_serializing_if = "Option::is_none")]
    hints: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct EnvelopeParam {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@value")]
    value: String,
}

fn to_envelope(event: &Event, target: Option<&str>) -> EventEnvelope {
    EventEnvelope {
        name: event.name.clone(),
        target: target.map(|t| t.to_string()),
        origin: event.origin.clone(),
        sendid: event.sendid.clone(),
        params: match &event.param_values {
            None => Vec::new(),
            Some(params) => params
                .iter()
                .map(|pair| EnvelopeParam {
                    name: pair.name.clone(),
                    value: pair.value.to_string(),
                })
                .collect(),
        },
        content: event.content.as_ref().map(|content| content.to_string()),
        hints: event
            .hints
            .as_ref()
            .map(|hints| serde_json::to_string(hints).unwrap_or_default()),
    }
}

fn from_envelope(envelope: EventEnvelope) -> Event {
    Event {
        name: envelope.name,
        etype: EventType::external,
        sendid: envelope.sendid,
        origin: envelope.origin,
        origin_type: None,
        invoke_id: None,
        param_values: if envelope.params.is_empty() {
            None
        } else {
            Some(
                envelope
                    .params
                    .into_iter()
                    .map(|param| ParamPair::new_moved(param.name, Data::String(param.value)))
                    .collect(),
            )
        },
        content: envelope.content.map(Data::String),
        hints: envelope
            .hints
            .and_then(|text| serde_json::from_str::<HashMap<String, String>>(&text).ok()),
    }
}

/// Serializes an event to the XML envelope.
pub fn to_xml(event: &Event, target: Option<&str>) -> Result<String, String> {
    quick_xml::se::to_string(&to_envelope(event, target)).map_err(|err| err.to_string())
}

/// Parses the XML envelope back to an event.
pub fn from_xml(text: &str) -> Result<Event, String> {
    let envelope: EventEnvelope =
        quick_xml::de::from_str(text).map_err(|err| format!("malformed event envelope: {}", err))?;
    if envelope.name.is_empty() {
        return Err("event envelope without name".to_string());
    }
    Ok(from_envelope(envelope))
}

/// Serializes an event to the JSON envelope (websocket form).
pub fn to_json(event: &Event, target: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "name": event.name,
        "data": event_data_value(event).to_json(),
    });
    let object = value.as_object_mut().expect("literal object");
    if let Some(target) = target {
        object.insert("target".to_string(), serde_json::Value::String(target.to_string()));
    }
    if let Some(origin) = &event.origin {
        object.insert("origin".to_string(), serde_json::Value::String(origin.clone()));
    }
    if let Some(sendid) = &event.sendid {
        object.insert("sendid".to_string(), serde_json::Value::String(sendid.clone()));
    }
    if let Some(hints) = &event.hints {
        object.insert(
            "hints".to_string(),
            serde_json::Value::Object(
                hints
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            ),
        );
    }
    value.to_string()
}

/// Parses the JSON envelope back to an event.
pub fn from_json(text: &str) -> Result<Event, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| format!("malformed event envelope: {}", err))?;
    let name = match value.get("name").and_then(|n| n.as_str()) {
        None | Some("") => return Err("event envelope without name".to_string()),
        Some(name) => name.to_string(),
    };
    let mut event = Event::new_external(&name);
    event.sendid = value
        .get("sendid")
        .and_then(|v| v.as_str())
        .map(String::from);
    event.origin = value
        .get("origin")
        .and_then(|v| v.as_str())
        .map(String::from);
    if let Some(data) = value.get("data") {
        match data {
            serde_json::Value::Object(object) => {
                event.param_values = Some(
                    object
                        .iter()
                        .map(|(k, v)| ParamPair::new_moved(k.clone(), Data::from_json(v)))
                        .collect(),
                );
            }
            serde_json::Value::Null => {}
            other => event.content = Some(Data::from_json(other)),
        }
    }
    if let Some(serde_json::Value::Object(hints)) = value.get("hints") {
        event.hints = Some(
            hints
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
        );
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        let mut event = Event::new_external("order.placed");
        event.sendid = Some("s1".to_string());
        event.origin = Some("#_scxml_7".to_string());
        event.param_values = Some(vec![
            ParamPair::new("item", &Data::String("tea".to_string())),
            ParamPair::new("count", &Data::Integer(2)),
        ]);
        event.hints = Some(HashMap::from([(
            "Content-type".to_string(),
            "text/plain".to_string(),
        )]));
        event
    }

    #[test]
    fn xml_envelope_round_trip() {
        let xml = to_xml(&sample_event(), Some("#_scxml_9")).unwrap();
        let event = from_xml(&xml).unwrap();
        assert_eq!(event.name, "order.placed");
        assert_eq!(event.sendid.as_deref(), Some("s1"));
        assert_eq!(event.origin.as_deref(), Some("#_scxml_7"));
        let params = event.param_values.unwrap();
        assert!(params
            .iter()
            .any(|p| p.name == "item" && p.value == Data::String("tea".to_string())));
        assert_eq!(
            event.hints.unwrap().get("Content-type").map(String::as_str),
            Some("text/plain")
        );
    }

    #[test]
    fn xml_envelope_rejects_garbage() {
        assert!(from_xml("this is not xml").is_err());
        assert!(from_xml("<event/>").is_err());
    }

    #[test]
    fn json_envelope_round_trip() {
        let json = to_json(&sample_event(), None);
        let event = from_json(&json).unwrap();
        assert_eq!(event.name, "order.placed");
        let params = event.param_values.unwrap();
        assert!(params
            .iter()
            .any(|p| p.name == "count" && p.value == Data::Integer(2)));
    }

    #[test]
    fn json_envelope_rejects_missing_name() {
        assert!(from_json("{}").is_err());
        assert!(from_json("nope").is_err());
    }
}
