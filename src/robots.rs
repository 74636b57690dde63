//! robots.txt rule parsing, inline rather than through an externalized
//! tokenizer: a small, self-contained parser good enough for
//! `User-agent`/`Disallow`/`Allow` with longest-match-wins.

#[derive(Debug, Clone)]
pub enum Robots {
    /// No robots.txt was found (HTTP 404) — treated as "no rules".
    NotApplicable,
    Rules(RuleSet),
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    allow: bool,
}

impl Robots {
    /// `true` iff `path` may be fetched under these rules.
    pub fn is_allowed(&self, path: &str) -> bool {
        match self {
            Robots::NotApplicable => true,
            Robots::Rules(set) => set.is_allowed(path),
        }
    }
}

impl RuleSet {
    fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<&Rule> = None;
        for rule in &self.rules {
            if path.starts_with(&rule.prefix) {
                let better = match best {
                    None => true,
                    Some(b) => rule.prefix.len() > b.prefix.len(),
                };
                if better {
                    best = Some(rule);
                }
            }
        }
        best.map(|r| r.allow).unwrap_or(true)
    }
}

/// Parse a robots.txt body for the rule groups applying to `*` and to
/// `user_agent` (case-insensitive), merging both into one rule set —
/// the group with the most specific (longest) `User-agent` match wins
/// per-directive, which in practice means: if a named group exists for
/// `user_agent`, its rules are used; otherwise `*`'s rules are used.
pub fn parse(body: &str, user_agent: &str) -> Robots {
    let mut current_agents: Vec<String> = Vec::new();
    let mut groups: Vec<(Vec<String>, Vec<Rule>)> = Vec::new();
    let mut current_rules: Vec<Rule> = Vec::new();
    let mut in_group = false;

    for raw_line in body.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_group && !current_rules.is_empty() {
                    groups.push((current_agents.clone(), current_rules.clone()));
                    current_agents.clear();
                    current_rules.clear();
                }
                current_agents.push(value.to_ascii_lowercase());
                in_group = true;
            }
            "disallow" => {
                if !value.is_empty() {
                    current_rules.push(Rule { prefix: value.to_string(), allow: false });
                } else {
                    // Empty Disallow means "allow everything" for this group.
                    current_rules.push(Rule { prefix: String::new(), allow: true });
                }
            }
            "allow" => {
                current_rules.push(Rule { prefix: value.to_string(), allow: true });
            }
            _ => {}
        }
    }
    if !current_agents.is_empty() {
        groups.push((current_agents, current_rules));
    }

    let ua_lower = user_agent.to_ascii_lowercase();
    let mut chosen: Option<Vec<Rule>> = None;
    for (agents, rules) in &groups {
        if agents.iter().any(|a| ua_lower.contains(a.as_str())) {
            chosen = Some(rules.clone());
            break;
        }
    }
    if chosen.is_none() {
        for (agents, rules) in &groups {
            if agents.iter().any(|a| a == "*") {
                chosen = Some(rules.clone());
                break;
            }
        }
    }

    match chosen {
        Some(rules) => Robots::Rules(RuleSet { rules }),
        None => Robots::NotApplicable,
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_path_is_rejected() {
        let body = "User-agent: *\nDisallow: /x\n";
        let robots = parse(body, "fetchd/0.1");
        assert!(!robots.is_allowed("/x"));
        assert!(!robots.is_allowed("/x/y"));
        assert!(robots.is_allowed("/other"));
    }

    #[test]
    fn longest_match_wins_over_shorter_disallow() {
        let body = "User-agent: *\nDisallow: /x\nAllow: /x/public\n";
        let robots = parse(body, "fetchd/0.1");
        assert!(robots.is_allowed("/x/public/file"));
        assert!(!robots.is_allowed("/x/private"));
    }

    #[test]
    fn missing_robots_txt_allows_everything() {
        let robots = Robots::NotApplicable;
        assert!(robots.is_allowed("/anything"));
    }

    #[test]
    fn named_group_overrides_wildcard() {
        let body = "User-agent: *\nDisallow: /\nUser-agent: fetchd\nDisallow:\n";
        let robots = parse(body, "fetchd/0.1");
        assert!(robots.is_allowed("/anything"));
    }
}
