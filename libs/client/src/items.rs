//! Record-item wire shapes.
//!
//! Item payloads are domain XML the caller owns; this module frames them for
//! transport and picks results back out without interpreting the domain
//! content.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use serde::Deserialize;
use uuid::Uuid;
use vaultlink_wire::WireError;

/// Identifies one stored item, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    pub id: Uuid,
    pub version_stamp: Option<String>,
}

impl ItemKey {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version_stamp: None,
        }
    }

    pub fn versioned(id: Uuid, version_stamp: impl Into<String>) -> Self {
        Self {
            id,
            version_stamp: Some(version_stamp.into()),
        }
    }
}

/// A query over one record's items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub type_ids: Vec<Uuid>,
    pub item_ids: Vec<Uuid>,
    pub max_results: Option<u32>,
    /// Echoed back by the service; useful when batching queries client-side.
    pub name: Option<String>,
}

impl ItemQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(type_id: Uuid) -> Self {
        Self {
            type_ids: vec![type_id],
            ..Self::default()
        }
    }

    pub fn with_type(mut self, type_id: Uuid) -> Self {
        self.type_ids.push(type_id);
        self
    }

    pub fn with_item(mut self, item_id: Uuid) -> Self {
        self.item_ids.push(item_id);
        self
    }

    pub fn with_max_results(mut self, max: u32) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Serializes the query group for a get-items call.
    pub(crate) fn to_body_xml(&self) -> Result<String, WireError> {
        let mut writer = Writer::new(Vec::new());

        let mut group = BytesStart::new("group");
        if let Some(name) = &self.name {
            group.push_attribute(("name", name.as_str()));
        }
        if let Some(max) = self.max_results {
            group.push_attribute(("max", max.to_string().as_str()));
        }
        writer.write_event(Event::Start(group))?;

        for item_id in &self.item_ids {
            write_text(&mut writer, "id", &item_id.to_string())?;
        }
        if !self.type_ids.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("filter")))?;
            for type_id in &self.type_ids {
                write_text(&mut writer, "type-id", &type_id.to_string())?;
            }
            writer.write_event(Event::End(BytesStart::new("filter").to_end()))?;
        }

        writer.write_event(Event::Start(BytesStart::new("format")))?;
        write_text(&mut writer, "section", "core")?;
        writer.write_event(Event::Empty(BytesStart::new("xml")))?;
        writer.write_event(Event::End(BytesStart::new("format").to_end()))?;

        writer.write_event(Event::End(BytesStart::new("group").to_end()))?;
        into_xml_string(writer)
    }
}

/// One new or replacement item to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPayload {
    pub type_id: Uuid,
    /// Inner domain XML. Passed through as-is; the caller is responsible
    /// for well-formedness.
    pub data_xml: String,
    /// Present when replacing an existing item.
    pub key: Option<ItemKey>,
}

impl ItemPayload {
    pub fn new(type_id: Uuid, data_xml: impl Into<String>) -> Self {
        Self {
            type_id,
            data_xml: data_xml.into(),
            key: None,
        }
    }

    pub fn replacing(mut self, key: ItemKey) -> Self {
        self.key = Some(key);
        self
    }

    pub(crate) fn to_item_xml(&self) -> Result<String, WireError> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Start(BytesStart::new("item")))?;
        if let Some(key) = &self.key {
            write_item_key(&mut writer, key)?;
        }
        write_text(&mut writer, "type-id", &self.type_id.to_string())?;
        writer.write_event(Event::Start(BytesStart::new("data-xml")))?;
        writer.write_event(Event::Text(BytesText::from_escaped(self.data_xml.as_str())))?;
        writer.write_event(Event::End(BytesStart::new("data-xml").to_end()))?;
        writer.write_event(Event::End(BytesStart::new("item").to_end()))?;
        into_xml_string(writer)
    }
}

/// Builds the removal body: one `item-id` element per key.
pub(crate) fn keys_to_body_xml(keys: &[ItemKey]) -> Result<String, WireError> {
    let mut writer = Writer::new(Vec::new());
    for key in keys {
        write_item_key(&mut writer, key)?;
    }
    into_xml_string(writer)
}

/// What a get-items call returned for one query group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQueryResult {
    /// Raw item XML fragments, one per returned item.
    pub items: Vec<String>,
    /// Keys the service matched but did not return, usually because the
    /// group hit its size cap. Fetch these with a follow-up id query.
    pub unprocessed_keys: Vec<ItemKey>,
}

impl ItemQueryResult {
    /// Parses the first query group out of a get-items response body.
    pub(crate) fn parse(body: &str) -> Result<Self, WireError> {
        let mut reader = Reader::from_str(body);
        let mut result = Self::default();

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => match start.local_name().as_ref() {
                    b"item" => {
                        let span = reader.read_to_end(start.name()).map_err(|err| {
                            WireError::Malformed(format!("unterminated item: {err}"))
                        })?;
                        let (from, to) = (span.start as usize, span.end as usize);
                        result.items.push(body[from..to].to_string());
                    }
                    b"item-id" => {
                        result.unprocessed_keys.push(read_item_key(&mut reader, &start, body)?);
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(WireError::Malformed(format!("bad item group: {err}"))),
            }
        }
        Ok(result)
    }
}

/// Parses the keys a put-items call assigned, in item order.
pub(crate) fn parse_item_keys(body: &str) -> Result<Vec<ItemKey>, WireError> {
    let mut reader = Reader::from_str(body);
    let mut keys = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) if start.local_name().as_ref() == b"item-id" => {
                keys.push(read_item_key(&mut reader, &start, body)?);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(WireError::Malformed(format!("bad item keys: {err}"))),
        }
    }
    Ok(keys)
}

/// Per-type access the app holds on a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypePermission {
    #[serde(rename = "type-id")]
    pub type_id: Uuid,
    /// Comma-separated access flags, as served.
    #[serde(rename = "online-access", default)]
    pub online_access: String,
    #[serde(rename = "offline-access", default)]
    pub offline_access: String,
}

fn read_item_key(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    body: &str,
) -> Result<ItemKey, WireError> {
    let version_stamp = start
        .try_get_attribute("version-stamp")
        .map_err(|err| WireError::Malformed(format!("bad version-stamp: {err}")))?
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());

    let span = reader
        .read_to_end(start.name())
        .map_err(|err| WireError::Malformed(format!("unterminated item-id: {err}")))?;
    let (from, to) = (span.start as usize, span.end as usize);
    let id = body[from..to]
        .trim()
        .parse::<Uuid>()
        .map_err(|err| WireError::Malformed(format!("item id is not a uuid: {err}")))?;

    Ok(ItemKey { id, version_stamp })
}

fn write_item_key(writer: &mut Writer<Vec<u8>>, key: &ItemKey) -> Result<(), WireError> {
    let mut start = BytesStart::new("item-id");
    if let Some(stamp) = &key.version_stamp {
        start.push_attribute(("version-stamp", stamp.as_str()));
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&key.id.to_string())))?;
    writer.write_event(Event::End(BytesStart::new("item-id").to_end()))?;
    Ok(())
}

fn write_text(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<(), WireError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesStart::new(tag).to_end()))?;
    Ok(())
}

fn into_xml_string(writer: Writer<Vec<u8>>) -> Result<String, WireError> {
    String::from_utf8(writer.into_inner())
        .map_err(|err| WireError::Malformed(format!("non-utf8 xml: {err}")))
}
