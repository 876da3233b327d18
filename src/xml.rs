//! The XML accumulator that collects command responses for the monitoring
//! system to pick apart with path queries.
use std::io::Write;

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::query::split_token;

const ROOT: &str = "teamspeak-instance";

/// Responses to this command are `|`-separated and carry repeated keys.
const BINDINGLIST: &str = "bindinglist";

/// One document per poll cycle, rooted at `<teamspeak-instance>`, with one
/// child element per executed command and one grandchild per observed key.
#[derive(Debug, Default)]
pub struct Document {
    sections: Vec<Section>,
}

#[derive(Debug)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    key: String,
    value: Option<String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one command's response record into the document, creating the
    /// command's element on first use.
    ///
    /// Most commands upsert: a key seen again replaces its previous value.
    /// The bindinglist is the exception, because its records repeat the `ip`
    /// key and every occurrence must survive as a sibling element.  To keep
    /// repeated merges from accumulating duplicates, all existing entries
    /// whose keys occur in the incoming record are removed first.
    pub fn merge(&mut self, command: &str, data: &str) {
        let tokens: Vec<(String, Option<String>)> = if command == BINDINGLIST {
            data.split('|').filter_map(split_token).collect()
        } else {
            data.split(' ').filter_map(split_token).collect()
        };

        let idx = match self.sections.iter().position(|s| s.name == command) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: command.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        let section = &mut self.sections[idx];

        if command == BINDINGLIST {
            section
                .entries
                .retain(|e| !tokens.iter().any(|(key, _)| *key == e.key));
            for (key, value) in tokens {
                section.entries.push(Entry { key, value });
            }
        } else {
            for (key, value) in tokens {
                match section.entries.iter_mut().find(|e| e.key == key) {
                    Some(entry) => entry.value = value,
                    None => section.entries.push(Entry { key, value }),
                }
            }
        }
    }

    /// Render the document as an indented UTF-8 XML string.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        String::from_utf8(buf).context("serialized XML was not UTF-8")
    }

    /// Serialize the document, pretty-printed, to `out`.
    pub fn write_to<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .context("writing XML declaration")?;
        writer.write_event(Event::Start(BytesStart::new(ROOT)))?;
        for section in &self.sections {
            writer.write_event(Event::Start(BytesStart::new(section.name.as_str())))?;
            for entry in &section.entries {
                match &entry.value {
                    Some(value) => {
                        writer.write_event(Event::Start(BytesStart::new(entry.key.as_str())))?;
                        writer.write_event(Event::Text(BytesText::new(value)))?;
                        writer.write_event(Event::End(BytesEnd::new(entry.key.as_str())))?;
                    }
                    None => {
                        writer.write_event(Event::Empty(BytesStart::new(entry.key.as_str())))?;
                    }
                }
            }
            writer.write_event(Event::End(BytesEnd::new(section.name.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
        Ok(())
    }
}
