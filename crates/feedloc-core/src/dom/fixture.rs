//! Feed page builder
//!
//! Produces markup shaped like the host site's timeline: a container
//! holding post articles, each with a name block, a permalink wrapping the
//! timestamp, and the post body.

use super::{Document, DomError, MemoryDocument, NodeId};
use crate::config::DomContract;
use serde::Deserialize;

/// One post to render
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedPost {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default)]
    pub text: String,
}

fn default_time() -> String {
    "1h".to_string()
}

impl FeedPost {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            display_name: None,
            time: default_time(),
            text: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

/// Builds feed pages and posts following a `DomContract`
#[derive(Debug, Clone, Default)]
pub struct FeedBuilder {
    contract: DomContract,
    next_status_id: u64,
}

impl FeedBuilder {
    pub fn new(contract: DomContract) -> Self {
        Self {
            contract,
            next_status_id: 1,
        }
    }

    /// Parse a JSON array of posts
    pub fn posts_from_json(json: &str) -> Result<Vec<FeedPost>, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Empty page without the feed container (still loading)
    pub fn loading_page(&self) -> MemoryDocument {
        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let header = doc.element("header", &[("role", "banner")], "");
        // Fresh document, the root always accepts children
        let _ = doc.append_child(root, header);
        doc
    }

    /// Append the feed container to `doc`
    pub fn add_container(&self, doc: &mut MemoryDocument) -> Result<NodeId, DomError> {
        let root = doc.root();
        let main = doc.element("main", &[("role", "main")], "");
        doc.append_child(root, main)?;
        let container = doc.element(
            "div",
            &[(self.contract.marker_attr.as_str(), self.contract.container_marker.as_str())],
            "",
        );
        doc.append_child(main, container)?;
        Ok(container)
    }

    /// Page with a container already holding `posts`
    pub fn page(&mut self, posts: &[FeedPost]) -> Result<(MemoryDocument, NodeId), DomError> {
        let mut doc = self.loading_page();
        let container = self.add_container(&mut doc)?;
        for post in posts {
            let unit = self.post(&mut doc, post)?;
            doc.append_child(container, unit)?;
        }
        Ok((doc, container))
    }

    /// Build a detached post article
    pub fn post(&mut self, doc: &mut MemoryDocument, post: &FeedPost) -> Result<NodeId, DomError> {
        let c = &self.contract;
        let profile = format!("/{}", post.handle);
        let status_id = self.next_status_id;
        self.next_status_id += 1;
        let permalink = format!("/{}/status/{}", post.handle, status_id);
        let display = post.display_name.clone().unwrap_or_else(|| post.handle.clone());

        let article = doc.element("article", &[(c.marker_attr.as_str(), c.unit_marker.as_str())], "");
        let name_block = doc.element("div", &[(c.marker_attr.as_str(), c.name_marker.as_str())], "");
        let display_link = doc.element(&c.anchor_tag, &[(c.href_attr.as_str(), profile.as_str())], &display);
        let meta = doc.element("div", &[], "");
        let handle_link = doc.element(
            &c.anchor_tag,
            &[(c.href_attr.as_str(), profile.as_str())],
            &format!("@{}", post.handle),
        );
        let time_row = doc.element("div", &[], "");
        let time_link = doc.element(&c.anchor_tag, &[(c.href_attr.as_str(), permalink.as_str())], "");
        let time = doc.element(&c.timestamp_tag, &[], &post.time);
        let body = doc.element("div", &[("lang", "en")], &post.text);

        doc.append_child(article, name_block)?;
        doc.append_child(name_block, display_link)?;
        doc.append_child(name_block, meta)?;
        doc.append_child(meta, handle_link)?;
        doc.append_child(meta, time_row)?;
        doc.append_child(time_row, time_link)?;
        doc.append_child(time_link, time)?;
        doc.append_child(article, body)?;

        Ok(article)
    }
}
