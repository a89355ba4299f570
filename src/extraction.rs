//! Entity and relation extraction with a chat model.
//!
//! Model output is parsed forgivingly: the reply must end with a JSON
//! object, anything before its first `{` is ignored, and a reply that does
//! not parse yields an empty payload. Inside a valid object, a malformed
//! entity or relation is dropped on its own.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::Result,
    llm::{ChatModel, Message},
    model::{ExtractionPayload, ParsedPayload},
};

pub const EXTRACTION_PROMPT: &str = "Extract named entities (people, orgs, locations, products, tickers) and key relations as triples.\n\
Return JSON with fields 'entities' (list of {id,name,type}) and 'relations' (list of {src,dst,type}).\n";

/// Characters of chunk text sent to the model.
pub const MAX_INPUT_CHARS: usize = 4000;

pub struct EntityExtractor {
    model: Arc<dyn ChatModel>,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Ask the model for the entities and relations in `text`.
    ///
    /// Provider failures are errors; unparseable replies are not.
    pub fn extract(&self, text: &str) -> Result<ParsedPayload> {
        let messages = [
            Message::system(EXTRACTION_PROMPT),
            Message::user(truncate_chars(text, MAX_INPUT_CHARS)),
        ];
        let reply = self.model.chat(&messages)?;
        let parsed = parse_payload(&reply);
        debug!(
            model = self.model.name(),
            entities = parsed.payload.entities.len(),
            relations = parsed.payload.relations.len(),
            malformed_entities = parsed.malformed_entities,
            malformed_relations = parsed.malformed_relations,
            "extracted payload"
        );
        Ok(parsed)
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parse the trailing JSON object of a model reply.
pub fn parse_payload(reply: &str) -> ParsedPayload {
    let reply = reply.trim();
    if !reply.ends_with('}') {
        return ParsedPayload::default();
    }
    let Some(start) = reply.find('{') else {
        return ParsedPayload::default();
    };

    match serde_json::from_str(&reply[start..]) {
        Ok(value) => ExtractionPayload::from_value_lenient(&value),
        Err(e) => {
            warn!(error = %e, "extraction reply is not valid JSON");
            ParsedPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Canned {
        reply: String,
        seen: Mutex<Vec<Message>>,
    }

    impl ChatModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn chat(&self, messages: &[Message]) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn parses_bare_json() {
        let payload = parse_payload(
            r#"{"entities":[{"id":"acme","name":"Acme","type":"org"}],"relations":[]}"#,
        );
        assert_eq!(payload.payload.entities.len(), 1);
        assert_eq!(payload.payload.entities[0].id, "acme");
    }

    #[test]
    fn ignores_leading_prose() {
        let payload = parse_payload(
            "Sure! Here is the JSON:\n{\"entities\": [], \"relations\": [{\"src\":\"a\",\"dst\":\"b\",\"type\":\"owns\"}]}\n",
        );
        assert_eq!(payload.payload.relations.len(), 1);
    }

    #[test]
    fn trailing_prose_yields_empty() {
        let payload = parse_payload("{\"entities\": []} hope this helps");
        assert!(payload.payload.is_empty());
    }

    #[test]
    fn garbage_yields_empty() {
        assert!(parse_payload("no json here").payload.is_empty());
        assert!(parse_payload("{not json}").payload.is_empty());
        assert!(parse_payload("").payload.is_empty());
    }

    #[test]
    fn one_bad_edge_keeps_the_rest_of_the_reply() {
        let parsed = parse_payload(
            r#"Here you go:
            {"entities": [{"id":"acme","name":"Acme","type":"org"},
                          {"id":"bob","name":"Bob","type":"person"},
                          {"id":7,"name":"Seven","type":"number"}],
             "relations": [{"src":"bob","dst":"acme","type":"works_at"},
                           {"src":"bob","type":"knows"}]}"#,
        );
        assert_eq!(parsed.payload.entities.len(), 2);
        assert_eq!(parsed.payload.relations.len(), 1);
        assert_eq!(parsed.malformed_entities, 1);
        assert_eq!(parsed.malformed_relations, 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn extractor_sends_prompt_and_truncated_text() {
        let model = Arc::new(Canned {
            reply: r#"{"entities":[{"id":"x","name":"X","type":"org"}]}"#.into(),
            seen: Mutex::new(Vec::new()),
        });
        let extractor = EntityExtractor::new(model.clone());

        let long = "w".repeat(MAX_INPUT_CHARS + 50);
        let parsed = extractor.extract(&long).unwrap();
        assert_eq!(parsed.payload.entities[0].id, "x");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].content, EXTRACTION_PROMPT);
        assert_eq!(seen[1].content.chars().count(), MAX_INPUT_CHARS);
    }
}
