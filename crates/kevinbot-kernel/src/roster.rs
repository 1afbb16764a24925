//! Remote roster framing.
//!
//! The roster is the robot's own tag followed by every connected remote,
//! comma-joined:
//!
//! ```text
//! KEVINBOTV3|1.0.0|kevinbot.kevinbot,R1|1.0|kevinbot.remote
//! ```
//!
//! The radio limits the payload per frame, so the string is cut into
//! chunks of at most `data_max` **bytes**, never inside a UTF-8 character,
//! and sent as `list:<index>:<last index>=<chunk>`.  A receiver rebuilds it
//! with [`RosterAssembler`].

use std::collections::BTreeMap;

use kevinbot_types::DecodeError;

pub const ROSTER_KEY: &str = "list";

/// `<id>|<version>|<kind>` identifying a roster member.
pub fn member_tag(id: &str, version: &str, kind: &str) -> String {
    format!("{id}|{version}|{kind}")
}

/// The comma-joined roster with `self_tag` first.
pub fn roster_payload<I, S>(self_tag: &str, remotes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut payload = self_tag.to_string();
    for remote in remotes {
        payload.push(',');
        payload.push_str(remote.as_ref());
    }
    payload
}

/// Cut `payload` into chunks of at most `data_max` bytes on character
/// boundaries.
///
/// A character wider than `data_max` still gets a chunk of its own.  An
/// empty payload yields one empty chunk.
pub fn chunk(payload: &str, data_max: usize) -> Vec<&str> {
    let budget = data_max.max(1);
    let mut chunks = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let mut end = budget.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    if chunks.is_empty() {
        chunks.push("");
    }
    chunks
}

pub fn chunk_key(index: usize, last: usize) -> String {
    format!("{ROSTER_KEY}:{index}:{last}")
}

/// `(key, value)` frames for the whole roster, in send order.
pub fn roster_frames(payload: &str, data_max: usize) -> Vec<(String, String)> {
    let chunks = chunk(payload, data_max);
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, part)| (chunk_key(index, last), part.to_string()))
        .collect()
}

/// Parse `list:<index>:<last>`.
pub fn parse_chunk_key(key: &str) -> Option<(usize, usize)> {
    let mut parts = key.split(':');
    if parts.next()? != ROSTER_KEY {
        return None;
    }
    let index = parts.next()?.parse().ok()?;
    let last = parts.next()?.parse().ok()?;
    if parts.next().is_some() || index > last {
        return None;
    }
    Some((index, last))
}

/// Reassembles a chunked roster, in any arrival order.
#[derive(Debug, Default)]
pub struct RosterAssembler {
    chunks: BTreeMap<usize, String>,
    last: Option<usize>,
}

impl RosterAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk; returns the full payload once every index arrived.
    ///
    /// A chunk announcing a different final index starts a new roster.
    pub fn push(&mut self, key: &str, value: &str) -> Result<Option<String>, DecodeError> {
        let (index, last) = parse_chunk_key(key).ok_or_else(|| DecodeError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        if self.last.is_some_and(|current| current != last) {
            self.chunks.clear();
        }
        self.last = Some(last);
        self.chunks.insert(index, value.to_string());

        if self.chunks.len() == last + 1 {
            let payload = std::mem::take(&mut self.chunks).into_values().collect();
            self.last = None;
            return Ok(Some(payload));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(frames: &[(String, String)]) -> String {
        let mut assembler = RosterAssembler::new();
        let mut result = None;
        for (key, value) in frames.iter().rev() {
            result = assembler.push(key, value).unwrap();
        }
        result.expect("roster incomplete")
    }

    #[test]
    fn payload_puts_self_first() {
        let tag = member_tag("KEVINBOTV3", "1.0.0", "kevinbot.kevinbot");
        assert_eq!(tag, "KEVINBOTV3|1.0.0|kevinbot.kevinbot");
        assert_eq!(
            roster_payload(&tag, ["R1|1.0|kevinbot.remote"]),
            "KEVINBOTV3|1.0.0|kevinbot.kevinbot,R1|1.0|kevinbot.remote"
        );
        assert_eq!(roster_payload(&tag, Vec::<String>::new()), tag);
    }

    #[test]
    fn roster_round_trips_through_chunks() {
        let remotes: Vec<String> = (0..12).map(|i| format!("REMOTE{i}|1.0|kevinbot.remote")).collect();
        let payload = roster_payload("KEVINBOTV3|1.0.0|kevinbot.kevinbot", &remotes);
        for data_max in [1, 7, 50, 100, payload.len(), payload.len() + 10] {
            let frames = roster_frames(&payload, data_max);
            assert!(frames.iter().all(|(_, v)| v.len() <= data_max));
            assert_eq!(reassemble(&frames), payload, "data_max = {data_max}");
        }
    }

    #[test]
    fn keys_carry_index_and_last_index() {
        let frames = roster_frames("abcdefgh", 3);
        let keys: Vec<&str> = frames.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["list:0:2", "list:1:2", "list:2:2"]);
        assert_eq!(frames[2].1, "gh");
    }

    #[test]
    fn budget_is_bytes_and_never_splits_a_character() {
        // 'é' is two bytes, '🤖' four.
        let payload = "Rémi|1.0|kevinbot.remote,🤖|2.0|kevinbot.remote";
        for data_max in [4, 5, 6, 10] {
            let chunks = chunk(payload, data_max);
            assert!(chunks.iter().all(|c| c.len() <= data_max));
            assert_eq!(chunks.concat(), payload);
        }
        let frames = roster_frames(payload, 5);
        assert_eq!(reassemble(&frames), payload);
    }

    #[test]
    fn oversized_character_gets_its_own_chunk() {
        assert_eq!(chunk("a🤖b", 2), vec!["a", "🤖", "b"]);
    }

    #[test]
    fn empty_payload_is_one_empty_chunk() {
        assert_eq!(roster_frames("", 50), vec![("list:0:0".to_string(), String::new())]);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_eq!(parse_chunk_key("list:1:3"), Some((1, 3)));
        assert_eq!(parse_chunk_key("list:4:3"), None);
        assert_eq!(parse_chunk_key("list:a:3"), None);
        assert_eq!(parse_chunk_key("core.full_mesh:0:1"), None);

        let mut assembler = RosterAssembler::new();
        assert!(assembler.push("list:x:1", "v").is_err());
    }

    #[test]
    fn new_transmission_discards_stale_chunks() -> Result<(), DecodeError> {
        let mut assembler = RosterAssembler::new();
        assert_eq!(assembler.push("list:0:2", "old")?, None);
        assert_eq!(assembler.push("list:0:1", "ne")?, None);
        assert_eq!(assembler.push("list:1:1", "w")?, Some("new".to_string()));
        Ok(())
    }
}
