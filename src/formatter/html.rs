use anyhow::Result;

use crate::{compare::Change, runner::RunStatistics};

use super::{base::FormatterCore, json::JsonFormatter, ResultFormatter};

const TEMPLATE: &str = include_str!("compare.html");
const PLACEHOLDER: &str = "let json = {};";

/// The JSON report embedded in a static viewer page.
pub struct HtmlFormatter {
    json: JsonFormatter,
}

impl HtmlFormatter {
    pub fn new(core: FormatterCore) -> Self {
        Self {
            json: JsonFormatter::new(core),
        }
    }
}

pub(crate) fn render_page(report: &str) -> String {
    // keep string contents from closing the script element
    let script_safe = report.replace("</", "<\\/");
    TEMPLATE.replacen(PLACEHOLDER, &format!("let json = {script_safe};"), 1)
}

impl ResultFormatter for HtmlFormatter {
    fn on_query_completed(&mut self, change: &Change) {
        self.json.on_query_completed(change);
    }

    fn on_change_logged(&mut self, change: &Change) -> Result<()> {
        self.json.on_change_logged(change)
    }

    fn on_finished(&mut self, stats: &RunStatistics) -> Result<()> {
        let page = render_page(&self.json.render_report(stats)?);
        let core = self.json.core_mut();
        core.write(&page)?;
        core.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::test_support::{change, settings, SharedBuffer};
    use serde_json::{json, Value};

    #[test]
    fn embeds_report_in_template() -> Result<()> {
        let buffer = SharedBuffer::default();
        let mut formatter = HtmlFormatter::new(FormatterCore::new(settings(1, false), buffer.sink()));
        let changed = change(
            "/v1/foo?x=1",
            json!({"a": "</script>"}),
            json!({"a": 2}),
            Some(json!({"a": ["</script>", 2]})),
        );

        formatter.on_query_completed(&changed);
        formatter.on_change_logged(&changed)?;
        formatter.on_finished(&RunStatistics::new(true))?;

        let page = buffer.contents();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(!page.contains(PLACEHOLDER));
        assert_eq!(page.matches("</script>").count(), 1);

        let start = page.find("let json = ").expect("embedded report") + "let json = ".len();
        let end = page[start..].find(";\n").expect("statement end") + start;
        let embedded = page[start..end].replace("<\\/", "</");
        let report: Value = serde_json::from_str(&embedded)?;
        assert_eq!(report["numQueriesChanged"], json!(1));
        assert_eq!(report["changes"][0]["old"]["response"], json!({"a": "</script>"}));
        Ok(())
    }
}
