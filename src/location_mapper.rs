//! Decides which node owns the definition for a path, and which file that
//! definition lives in.

use std::cell::RefCell;

use crate::{error::ConfigError, path::NodePath, path_pattern::PathPattern};

/// Characters that do not belong in a file name on at least one platform.
const FORBIDDEN_FILE_CHARS: &[char] = &[':', '<', '>', '"', '\\', '|', '?', '*'];

const DEFAULT_RULES: &[(&str, &str)] = &[
    ("/hippo:namespaces/*", "namespaces/$1.json"),
    ("/hippo:configuration/*/*", "configuration/$1/$2.json"),
    ("/content/documents/*", "documents/$1.json"),
    ("/content/*", "content/$1.json"),
    ("/*", "$1.json"),
    ("/", "root.json"),
];

/// Maps every node matching `context` to a file, built by substituting `$1`,
/// `$2`, ... in `file` with what each wildcard matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRule {
    context: PathPattern,
    file: String,
}

impl LocationRule {
    pub fn new(context: &str, file: &str) -> Result<Self, ConfigError> {
        let pattern = PathPattern::new(context)?;

        let wildcards = pattern.wildcard_count();
        for reference in template_references(file) {
            if reference == 0 || reference > wildcards {
                return Err(ConfigError::InvalidLocationRule {
                    context: context.to_owned(),
                    reason: format!(
                        "file template refers to ${} but the pattern has {} wildcard(s)",
                        reference, wildcards
                    ),
                });
            }
        }

        if file.trim().is_empty() {
            return Err(ConfigError::InvalidLocationRule {
                context: context.to_owned(),
                reason: "file template is empty".to_owned(),
            });
        }

        Ok(Self {
            context: pattern,
            file: file.to_owned(),
        })
    }

    pub fn context(&self) -> &PathPattern {
        &self.context
    }

    fn file_for(&self, captures: &[String]) -> String {
        let mut file = String::with_capacity(self.file.len());
        let mut chars = self.file.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                file.push(c);
                continue;
            }

            let mut digits = String::new();
            while let Some(digit) = chars.peek().filter(|next| next.is_ascii_digit()) {
                digits.push(*digit);
                chars.next();
            }

            match digits.parse::<usize>() {
                Ok(index) => {
                    let capture = captures.get(index - 1).map(String::as_str).unwrap_or("");
                    file.push_str(&sanitize(capture));
                }
                Err(_) => file.push('$'),
            }
        }

        file
    }
}

fn template_references(template: &str) -> Vec<usize> {
    let mut references = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            continue;
        }

        let mut digits = String::new();
        while let Some(digit) = chars.peek().filter(|next| next.is_ascii_digit()) {
            digits.push(*digit);
            chars.next();
        }

        if let Ok(index) = digits.parse() {
            references.push(index);
        }
    }

    references
}

/// Replaces characters that are unsafe in file names. Slashes are kept, since
/// a `**` capture legitimately spans directories.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_FILE_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// The node whose definition should hold the routed path.
    pub context: NodePath,

    /// Path of the source file, relative to a module's config or content root.
    pub file: String,
}

/// Rules are tried in order. For each rule the shallowest matching ancestor of
/// the path wins, so more specific rules must come first.
#[derive(Debug)]
pub struct LocationMapper {
    rules: Vec<LocationRule>,
    last: RefCell<Option<(NodePath, Route)>>,
}

impl Default for LocationMapper {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Clone for LocationMapper {
    fn clone(&self) -> Self {
        Self::with_rules(self.rules.clone())
    }
}

impl LocationMapper {
    /// Creates a mapper that tries `rules` before the built-in ones.
    pub fn new(rules: Vec<LocationRule>) -> Self {
        let mut all = rules;
        for (context, file) in DEFAULT_RULES {
            match LocationRule::new(context, file) {
                Ok(rule) => all.push(rule),
                Err(err) => log::error!("Built-in location rule is invalid: {}", err),
            }
        }

        Self::with_rules(all)
    }

    /// Creates a mapper with exactly `rules`.
    pub fn with_rules(rules: Vec<LocationRule>) -> Self {
        Self {
            rules,
            last: RefCell::new(None),
        }
    }

    pub fn route(&self, path: &NodePath, is_node: bool) -> Route {
        // Properties never own a definition, so they go wherever their node
        // goes.
        let node_path = if is_node {
            path.clone()
        } else {
            path.parent().unwrap_or_default()
        };

        if let Some((last_path, route)) = &*self.last.borrow() {
            if *last_path == node_path {
                return route.clone();
            }
        }

        let route = self.compute(&node_path);
        log::trace!("Routed {} to {} in {}", node_path, route.context, route.file);

        *self.last.borrow_mut() = Some((node_path, route.clone()));
        route
    }

    pub fn context_root(&self, path: &NodePath) -> NodePath {
        self.route(path, true).context
    }

    /// Whether `path` should be the root of its own definition.
    pub fn should_start_definition(&self, path: &NodePath) -> bool {
        self.route(path, true).context == *path
    }

    fn compute(&self, path: &NodePath) -> Route {
        let mut ancestors: Vec<NodePath> = path.ancestors_or_self().collect();
        ancestors.reverse();

        for rule in &self.rules {
            for candidate in &ancestors {
                if let Some(captures) = rule.context.captures(&candidate.to_string()) {
                    return Route {
                        context: candidate.clone(),
                        file: rule.file_for(&captures),
                    };
                }
            }
        }

        Route {
            context: NodePath::root(),
            file: "root.json".to_owned(),
        }
    }
}
