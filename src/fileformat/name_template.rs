use anyhow::bail;

///////////////////////////////
/// Compiled read-name template for output FASTQ records.
///
/// Templates use named placeholders: {read_name} for the original header and
/// one placeholder per barcode slot, e.g. "{read_name} CB:Z:{cell}".
/// Unknown placeholders are a configuration error at compile time, not at
/// render time
#[derive(Debug, Clone)]
pub struct NameTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    ReadName,
    Slot(usize),
}

impl NameTemplate {
    pub fn compile(template: &str, slot_names: &[&str]) -> anyhow::Result<NameTemplate> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if !rest[..open].is_empty() {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                bail!("Unclosed placeholder in name template: {}", template);
            };
            let name = &after[..close];
            if name == "read_name" {
                segments.push(Segment::ReadName);
            } else if let Some(slot) = slot_names.iter().position(|s| *s == name) {
                segments.push(Segment::Slot(slot));
            } else {
                bail!(
                    "Unknown placeholder {{{}}} in name template; known placeholders: read_name, {}",
                    name,
                    slot_names.join(", ")
                );
            }
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(NameTemplate { segments })
    }

    ///////////////////////////////
    /// Render an output read name. slot_labels is indexed by slot, in the
    /// order the slot names were given to compile()
    pub fn render(&self, read_name: &str, slot_labels: &[&str]) -> String {
        let mut out = String::with_capacity(read_name.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::ReadName => out.push_str(read_name),
                Segment::Slot(i) => out.push_str(slot_labels[*i]),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_template() {
        let t = NameTemplate::compile("{read_name} CB:Z:{cell}", &["cell"]).unwrap();
        assert_eq!(t.render("read1", &["AACC"]), "read1 CB:Z:AACC");
    }

    #[test]
    fn test_render_two_slots() {
        let t = NameTemplate::compile("{read_name} CB:Z:{i5}{T7}", &["i5", "T7"]).unwrap();
        assert_eq!(t.render("r", &["AA", "CC"]), "r CB:Z:AACC");
    }

    #[test]
    fn test_literal_only() {
        let t = NameTemplate::compile("fixed", &[]).unwrap();
        assert_eq!(t.render("ignored", &[]), "fixed");
    }

    #[test]
    fn test_unknown_placeholder() {
        assert!(NameTemplate::compile("{read_name} {nope}", &["cell"]).is_err());
    }

    #[test]
    fn test_unclosed_placeholder() {
        assert!(NameTemplate::compile("{read_name", &[]).is_err());
    }
}
