/// A parsed `<selector>._bimi.<domain>` TXT record (RFC-draft BIMI tag list):
/// `v=BIMI1; l=<indicator URI>; a=<authority evidence URI>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BimiRecord {
    pub selector: String,
    pub indicator_uri: Option<String>,
    pub authority_uri: Option<String>,
}

impl BimiRecord {
    pub(crate) fn parse(selector: &str, txt: &str) -> Result<Self, String> {
        let mut version_seen = false;
        let mut indicator_uri = None;
        let mut authority_uri = None;

        for part in txt.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(format!("invalid part {part:?}"));
            };
            let (key, value) = (key.trim(), value.trim());

            if !version_seen {
                match (key, value) {
                    ("v", "BIMI1") => {
                        version_seen = true;
                        continue;
                    }
                    _ => return Err(format!("expected v=BIMI1, got {key}={value}")),
                }
            }

            match key {
                "l" => indicator_uri = (!value.is_empty()).then(|| value.to_string()),
                "a" => authority_uri = (!value.is_empty()).then(|| value.to_string()),
                _ => continue, // unrecognized tags are ignored
            }
        }

        if !version_seen {
            return Err(format!("missing v=BIMI1 in {txt:?}"));
        }

        Ok(Self {
            selector: selector.to_string(),
            indicator_uri,
            authority_uri,
        })
    }
}
