use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

mod fetch;
mod forms;
mod html;
mod selector;
#[cfg(test)]
mod tests;

pub use fetch::{ApiOptions, ApiResult, FetchResponse, FetchTransport};

use fetch::MockExchange;
use html::parse_html;

/// Delay before an alert banner starts fading out.
pub const ALERT_DISMISS_DELAY_MS: i64 = 5000;
/// Extra delay between the fade and the removal from the tree, matching the
/// CSS transition length the banners are styled with.
pub const ALERT_FADE_MS: i64 = 300;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
struct Element {
    tag_name: String,
    attrs: HashMap<String, String>,
    value: String,
    disabled: bool,
    readonly: bool,
}

#[derive(Debug, Clone)]
struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let disabled = attrs.contains_key("disabled");
        let readonly = attrs.contains_key("readonly");
        let element = Element {
            tag_name,
            attrs,
            value,
            disabled,
            readonly,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.entry(id_attr).or_insert(id);
        }
        id
    }

    fn create_detached_element(&mut self, tag_name: String) -> NodeId {
        let element = Element {
            tag_name,
            attrs: HashMap::new(),
            value: String::new(),
            disabled: false,
            readonly: false,
        };
        self.create_node(None, NodeType::Element(element))
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    fn is_valid_node(&self, node_id: NodeId) -> bool {
        node_id.0 < self.nodes.len()
    }

    fn can_have_children(&self, node_id: NodeId) -> bool {
        matches!(
            self.nodes[node_id.0].node_type,
            NodeType::Document | NodeType::Element(_)
        )
    }

    fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(name).cloned())
    }

    fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("attribute target is not an element".into()))?;
        element.attrs.insert(name.to_string(), value.to_string());
        if name == "id" {
            self.rebuild_id_index();
        }
        Ok(())
    }

    fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.disabled).unwrap_or(false)
    }

    fn readonly(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.readonly).unwrap_or(false)
    }

    fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn value(&self, node_id: NodeId) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))?;
        Ok(element.value.clone())
    }

    fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))?;
        element.value = value.to_string();
        Ok(())
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::Runtime(
                "appendChild target cannot have children".into(),
            ));
        }
        if child == self.root || child == parent {
            return Err(Error::Runtime("invalid appendChild node".into()));
        }
        if !self.is_valid_node(child) {
            return Err(Error::Runtime("appendChild node is invalid".into()));
        }

        // Prevent cycles: parent must not be inside child's subtree.
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(Error::Runtime("appendChild would create a cycle".into()));
            }
            cursor = self.parent(node);
        }

        if let Some(old_parent) = self.parent(child) {
            self.nodes[old_parent.0].children.retain(|id| *id != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.rebuild_id_index();
        Ok(())
    }

    fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let reference = self.nodes[parent.0].children.first().copied();
        if let Some(reference) = reference {
            self.insert_before(parent, child, reference)
        } else {
            self.append_child(parent, child)
        }
    }

    fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) -> Result<()> {
        if !self.can_have_children(parent) {
            return Err(Error::Runtime(
                "insertBefore target cannot have children".into(),
            ));
        }
        if child == self.root || child == parent {
            return Err(Error::Runtime("invalid insertBefore node".into()));
        }
        if !self.is_valid_node(child) || !self.is_valid_node(reference) {
            return Err(Error::Runtime("insertBefore node is invalid".into()));
        }
        if self.parent(reference) != Some(parent) {
            return Err(Error::Runtime(
                "insertBefore reference is not a direct child".into(),
            ));
        }
        if child == reference {
            return Ok(());
        }

        // Prevent cycles: parent must not be inside child's subtree.
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(Error::Runtime("insertBefore would create a cycle".into()));
            }
            cursor = self.parent(node);
        }

        if let Some(old_parent) = self.parent(child) {
            self.nodes[old_parent.0].children.retain(|id| *id != child);
        }

        let Some(index) = self.nodes[parent.0]
            .children
            .iter()
            .position(|id| *id == reference)
        else {
            return Err(Error::Runtime("insertBefore reference is missing".into()));
        };

        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(index, child);
        self.rebuild_id_index();
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child) != Some(parent) {
            return Err(Error::Runtime(
                "removeChild target is not a direct child".into(),
            ));
        }
        self.nodes[parent.0].children.retain(|id| *id != child);
        self.nodes[child.0].parent = None;
        self.rebuild_id_index();
        Ok(())
    }

    fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::Runtime("cannot remove document root".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.remove_child(parent, node)
    }

    fn set_inner_html(&mut self, node_id: NodeId, html: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Runtime("innerHTML target is not an element".into()));
        }

        let fragment = parse_html(html)?;

        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in old_children {
            self.nodes[child.0].parent = None;
        }

        let children = fragment.nodes[fragment.root.0].children.clone();
        for child in children {
            let _ = self.clone_subtree_from_dom(&fragment, child, Some(node_id))?;
        }

        self.rebuild_id_index();
        Ok(())
    }

    fn clone_subtree_from_dom(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let node_type = match &source.nodes[source_node.0].node_type {
            NodeType::Document => {
                return Err(Error::Runtime(
                    "cannot clone document node into innerHTML target".into(),
                ));
            }
            NodeType::Element(element) => NodeType::Element(element.clone()),
            NodeType::Text(text) => NodeType::Text(text.clone()),
        };

        let node = self.create_node(parent, node_type);
        for child in &source.nodes[source_node.0].children {
            let _ = self.clone_subtree_from_dom(source, *child, Some(node))?;
        }
        Ok(node)
    }

    fn rebuild_id_index(&mut self) {
        let mut index = HashMap::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if let Some(id_attr) = self
                .element(node)
                .and_then(|element| element.attrs.get("id").cloned())
            {
                index.entry(id_attr).or_insert(node);
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        self.id_index = index;
    }

    fn collect_elements_dfs(&self, node: NodeId, out: &mut Vec<NodeId>) {
        if self.element(node).is_some() {
            out.push(node);
        }
        for child in &self.nodes[node.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    fn collect_elements_descendants_dfs(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    fn class_contains(&self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        Ok(has_class(element, class_name))
    }

    fn class_add(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        if !classes.iter().any(|name| name == class_name) {
            classes.push(class_name.to_string());
        }
        set_class_attr(element, &classes);
        Ok(())
    }

    fn class_remove(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        classes.retain(|name| name != class_name);
        set_class_attr(element, &classes);
        Ok(())
    }

    fn class_toggle(&mut self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let has = self.class_contains(node_id, class_name)?;
        if has {
            self.class_remove(node_id, class_name)?;
            Ok(false)
        } else {
            self.class_add(node_id, class_name)?;
            Ok(true)
        }
    }

    fn style_get(&self, node_id: NodeId, property: &str) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        Ok(decls
            .iter()
            .find(|(prop, _)| prop == property)
            .map(|(_, value)| value.clone())
            .unwrap_or_default())
    }

    fn style_set(&mut self, node_id: NodeId, property: &str, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let mut decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        if let Some(entry) = decls.iter_mut().find(|(prop, _)| prop == property) {
            entry.1 = value.to_string();
        } else {
            decls.push((property.to_string(), value.to_string()));
        }
        let rendered = decls
            .iter()
            .map(|(prop, value)| format!("{prop}: {value}"))
            .collect::<Vec<_>>()
            .join("; ");
        element.attrs.insert("style".to_string(), rendered);
        Ok(())
    }

    fn initialize_form_control_values(&mut self) {
        let mut nodes = Vec::new();
        self.collect_elements_dfs(self.root, &mut nodes);
        for node in nodes {
            let tag = self
                .tag_name(node)
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            if tag == "textarea" {
                let text = self.text_content(node);
                if let Some(element) = self.element_mut(node) {
                    element.value = text;
                }
            } else if tag == "select" {
                self.sync_select_value(node);
            }
        }
    }

    fn sync_select_value(&mut self, select_node: NodeId) {
        let mut options = Vec::new();
        self.collect_options(select_node, &mut options);
        let chosen = options
            .iter()
            .copied()
            .find(|option| {
                self.element(*option)
                    .map(|element| element.attrs.contains_key("selected"))
                    .unwrap_or(false)
            })
            .or_else(|| options.first().copied());
        let value = chosen
            .map(|option| self.option_effective_value(option))
            .unwrap_or_default();
        if let Some(element) = self.element_mut(select_node) {
            element.value = value;
        }
    }

    fn collect_options(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node.0].children {
            if self
                .tag_name(*child)
                .map(|tag| tag.eq_ignore_ascii_case("option"))
                .unwrap_or(false)
            {
                out.push(*child);
            }
            self.collect_options(*child, out);
        }
    }

    fn option_effective_value(&self, option: NodeId) -> String {
        self.element(option)
            .and_then(|element| element.attrs.get("value").cloned())
            .unwrap_or_else(|| self.text_content(option).trim().to_string())
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                for (k, v) in &element.attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }
}

fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

fn class_tokens(class_attr: Option<&str>) -> Vec<String> {
    class_attr
        .map(|value| {
            value
                .split_whitespace()
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn set_class_attr(element: &mut Element, classes: &[String]) {
    if classes.is_empty() {
        element.attrs.remove("class");
    } else {
        element.attrs.insert("class".to_string(), classes.join(" "));
    }
}

fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    style_attr
        .map(|src| {
            src.split(';')
                .filter_map(|decl| {
                    let (prop, value) = decl.split_once(':')?;
                    let prop = prop.trim().to_ascii_lowercase();
                    let value = value.trim().to_string();
                    if prop.is_empty() || value.is_empty() {
                        None
                    } else {
                        Some((prop, value))
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn truncate_chars(src: &str, max_chars: usize) -> String {
    if src.chars().count() <= max_chars {
        return src.to_string();
    }
    let mut out = src.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// How a recorded scroll was asked to move the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Auto,
    Smooth,
}

/// One observed viewport movement. `target` is `None` for a jump to the
/// document top (a bare `#` link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollEvent {
    pub target: Option<NodeId>,
    pub behavior: ScrollBehavior,
}

// Click behaviors are explicit values rather than captured closures, so a
// binding survives arbitrary tree mutation without dangling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClickAction {
    SmoothScrollAnchor,
    RemoveParentAlert,
}

#[derive(Debug, Default, Clone)]
struct ListenerStore {
    map: HashMap<NodeId, Vec<ClickAction>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, action: ClickAction) {
        self.map.entry(node_id).or_default().push(action);
    }

    fn get(&self, node_id: NodeId) -> Vec<ClickAction> {
        self.map.get(&node_id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    FadeOutAlert(NodeId),
    RemoveAlert(NodeId),
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    action: TimerAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
}

/// A server-rendered page plus the runtime state its inline script would own
/// in a browser: bound anchors, pending dismissal timers, a deterministic
/// clock, and the fetch plumbing behind `api_call`.
pub struct Page {
    dom: Dom,
    listeners: ListenerStore,
    task_queue: Vec<ScheduledTask>,
    now_ms: i64,
    timer_step_limit: usize,
    next_timer_id: i64,
    next_task_order: i64,
    scroll_events: Vec<ScrollEvent>,
    fetch_mocks: HashMap<String, MockExchange>,
    fetch_calls: Vec<String>,
    transport: Option<Box<dyn FetchTransport>>,
    trace: bool,
    trace_events: bool,
    trace_timers: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    /// Loads the markup and runs the two load-time passes: anchors present
    /// in the initial markup get their smooth-scroll binding, and every
    /// `.alert` already in the tree is scheduled for auto-dismissal. Nodes
    /// inserted after this point receive neither.
    pub fn from_html(html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        let mut page = Self {
            dom,
            listeners: ListenerStore::default(),
            task_queue: Vec::new(),
            now_ms: 0,
            timer_step_limit: 10_000,
            next_timer_id: 1,
            next_task_order: 0,
            scroll_events: Vec::new(),
            fetch_mocks: HashMap::new(),
            fetch_calls: Vec::new(),
            transport: None,
            trace: false,
            trace_events: true,
            trace_timers: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };
        page.bind_anchor_links()?;
        page.fire_content_loaded()?;
        Ok(page)
    }

    fn bind_anchor_links(&mut self) -> Result<()> {
        for anchor in self.dom.query_selector_all(r##"a[href^="#"]"##)? {
            self.listeners.add(anchor, ClickAction::SmoothScrollAnchor);
        }
        Ok(())
    }

    fn fire_content_loaded(&mut self) -> Result<()> {
        for alert in self.dom.query_selector_all(".alert")? {
            self.schedule_alert_dismissal(alert);
        }
        Ok(())
    }

    fn schedule_alert_dismissal(&mut self, alert: NodeId) {
        self.schedule(ALERT_DISMISS_DELAY_MS, TimerAction::FadeOutAlert(alert));
    }

    fn schedule(&mut self, delay_ms: i64, action: TimerAction) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        let due_at = self.now_ms.saturating_add(delay_ms);
        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            action,
        });
        self.trace_timer_line(format!(
            "[timer] schedule id={id} due_at={due_at} action={action:?}"
        ));
        id
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn clear_all_timers(&mut self) -> usize {
        let cleared = self.task_queue.len();
        self.task_queue.clear();
        self.trace_timer_line(format!("[timer] clear_all cleared={cleared}"));
        cleared
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Runtime(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    /// Runs every scheduled task, advancing the clock task by task. Chained
    /// schedules (a fade queueing its own removal) are followed to the end.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(Error::Runtime(format!(
                    "timer queue exceeded step limit {} (pending={})",
                    self.timer_step_limit,
                    self.task_queue.len()
                )));
            }
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.execute_timer_task(task)?;
        }
        Ok(steps)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| due_limit.map(|limit| task.due_at <= limit).unwrap_or(true))
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    fn execute_timer_task(&mut self, task: ScheduledTask) -> Result<()> {
        self.trace_timer_line(format!(
            "[timer] run id={} at={} action={:?}",
            task.id, self.now_ms, task.action
        ));
        match task.action {
            TimerAction::FadeOutAlert(node) => {
                if self.dom.element(node).is_some() {
                    self.dom.style_set(node, "opacity", "0")?;
                    self.schedule(ALERT_FADE_MS, TimerAction::RemoveAlert(node));
                }
            }
            TimerAction::RemoveAlert(node) => {
                // The alert may already have been closed by hand; a missing
                // parent turns the stale removal into a no-op.
                if self.dom.parent(node).is_some() {
                    self.dom.remove_node(node)?;
                }
            }
        }
        Ok(())
    }

    /// Dispatches a click to the first match and bubbles it to the root,
    /// running the explicit actions registered along the path. Clicks on
    /// disabled elements are swallowed.
    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        self.trace_event_line(format!("[event] click selector={selector}"));

        let mut default_prevented = false;
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            for action in self.listeners.get(node) {
                match action {
                    ClickAction::SmoothScrollAnchor => {
                        if self.run_smooth_scroll_anchor(node)? {
                            default_prevented = true;
                        }
                    }
                    ClickAction::RemoveParentAlert => {
                        if let Some(alert) = self.dom.parent(node) {
                            self.dom.remove_node(alert)?;
                        }
                    }
                }
            }
            cursor = self.dom.parent(node);
        }

        if !default_prevented {
            self.run_default_anchor_jump(target)?;
        }
        Ok(())
    }

    fn run_smooth_scroll_anchor(&mut self, anchor: NodeId) -> Result<bool> {
        let href = self.dom.attr(anchor, "href").unwrap_or_default();
        if href == "#" || !href.starts_with('#') {
            // A placeholder link keeps its default jump.
            return Ok(false);
        }
        if let Some(fragment) = self.dom.query_selector(&href)? {
            self.scroll_events.push(ScrollEvent {
                target: Some(fragment),
                behavior: ScrollBehavior::Smooth,
            });
            self.trace_event_line(format!("[event] smooth scroll href={href}"));
        }
        Ok(true)
    }

    fn run_default_anchor_jump(&mut self, target: NodeId) -> Result<()> {
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            if self
                .dom
                .tag_name(node)
                .map(|tag| tag.eq_ignore_ascii_case("a"))
                .unwrap_or(false)
            {
                let Some(href) = self.dom.attr(node, "href") else {
                    return Ok(());
                };
                if href == "#" {
                    self.scroll_events.push(ScrollEvent {
                        target: None,
                        behavior: ScrollBehavior::Auto,
                    });
                } else if href.starts_with('#') {
                    if let Some(fragment) = self.dom.query_selector(&href)? {
                        self.scroll_events.push(ScrollEvent {
                            target: Some(fragment),
                            behavior: ScrollBehavior::Auto,
                        });
                    }
                }
                return Ok(());
            }
            cursor = self.dom.parent(node);
        }
        Ok(())
    }

    /// Flips the `active` class on the first `.nav-menu`. No menu in the
    /// markup makes this a silent no-op.
    pub fn toggle_mobile_menu(&mut self) -> Result<()> {
        let Some(menu) = self.dom.query_selector(".nav-menu")? else {
            return Ok(());
        };
        let now_active = self.dom.class_toggle(menu, "active")?;
        self.trace_event_line(format!("[event] nav-menu toggle active={now_active}"));
        Ok(())
    }

    /// Builds a dismissible `alert alert-<kind>` banner (kind defaults to
    /// `success`) with an embedded close button, inserts it as the first
    /// child of `main` when one exists, and schedules the standard
    /// fade-then-remove sequence either way. Without a `main` the banner
    /// stays detached and the removal guard makes its timers inert.
    pub fn show_notification(&mut self, message: &str, kind: Option<&str>) -> Result<()> {
        let kind = kind.unwrap_or("success");
        let alert = self.dom.create_detached_element("div".to_string());
        self.dom
            .set_attr(alert, "class", &format!("alert alert-{kind}"))?;
        self.dom.create_text(alert, message.to_string());

        let close = self.dom.create_element(
            alert,
            "button".to_string(),
            HashMap::from([("class".to_string(), "alert-close".to_string())]),
        );
        self.dom.create_text(close, "\u{00D7}".to_string());
        self.listeners.add(close, ClickAction::RemoveParentAlert);

        if let Some(main) = self.dom.query_selector("main")? {
            self.dom.prepend_child(main, alert)?;
        }

        self.trace_event_line(format!("[event] notification kind={kind} message={message}"));
        self.schedule_alert_dismissal(alert);
        Ok(())
    }

    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        if self.dom.readonly(target) {
            return Ok(());
        }

        let tag = self
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();

        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.dom.set_value(target, text)?;
        Ok(())
    }

    pub fn set_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_inner_html(target, html)
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn style(&self, selector: &str, property: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.style_get(target, property)
    }

    pub fn has_class(&self, selector: &str, class_name: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        self.dom.class_contains(target, class_name)
    }

    pub fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.dom.query_selector(selector)?.is_some())
    }

    pub fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.dom.query_selector_all(selector)?.len())
    }

    pub fn node_id(&self, selector: &str) -> Result<NodeId> {
        self.select_one(selector)
    }

    pub fn take_scroll_events(&mut self) -> Vec<ScrollEvent> {
        std::mem::take(&mut self.scroll_events)
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn trace_timer_line(&mut self, line: String) {
        if self.trace_timers {
            self.push_trace_line(line);
        }
    }

    fn trace_event_line(&mut self, line: String) {
        if self.trace_events {
            self.push_trace_line(line);
        }
    }

    // Fetch failures are recorded whether tracing is on or not; the API
    // helper's contract is that a failure always leaves a diagnostic trail.
    pub(crate) fn record_fetch_failure(&mut self, line: String) {
        if self.trace && self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }

    fn push_trace_line(&mut self, line: String) {
        if !self.trace {
            return;
        }
        if self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }
}
