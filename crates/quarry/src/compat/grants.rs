//! Account and grant compatibility
//!
//! Grants are rewritten statement by statement. A `GRANT` left without
//! privileges is dropped; role grants (`GRANT role TO account`) pass through.

use regex::Regex;
use std::sync::LazyLock;

use super::{CompatToken, Compatibility};
use crate::catalog::{Catalog, RoutineKind, User};
use crate::error::Issue;
use crate::ident::split_qualified;
use crate::version::Version;

/// Privileges MySQL HeatWave Service does not allow to grant
pub const RESTRICTED_PRIVILEGES: &[&str] = &[
    "BACKUP_ADMIN",
    "BINLOG_ADMIN",
    "BINLOG_ENCRYPTION_ADMIN",
    "CLONE_ADMIN",
    "CREATE TABLESPACE",
    "ENCRYPTION_KEY_ADMIN",
    "FILE",
    "GROUP_REPLICATION_ADMIN",
    "INNODB_REDO_LOG_ARCHIVE",
    "PERSIST_RO_VARIABLES_ADMIN",
    "RELOAD",
    "REPLICATION_SLAVE_ADMIN",
    "ROLE_ADMIN",
    "SERVICE_CONNECTION_ADMIN",
    "SET_USER_ID",
    "SHUTDOWN",
    "SUPER",
    "SYSTEM_USER",
    "SYSTEM_VARIABLES_ADMIN",
    "TABLE_ENCRYPTION_ADMIN",
    "VERSION_TOKEN_ADMIN",
];

/// Authentication plugins accepted by MySQL HeatWave Service
pub const SUPPORTED_PLUGINS: &[&str] = &[
    "caching_sha2_password",
    "mysql_native_password",
    "sha256_password",
    "authentication_oci_client",
];

/// First version with `SET_ANY_DEFINER`
const SET_ANY_DEFINER_VERSION: Version = Version::new(8, 2, 0);

static GRANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*GRANT\s+(.+?)\s+ON\s+(.+?)\s+TO\s+(.+)$").expect("grant regex is invalid")
});

/// A `GRANT privileges ON target TO ...` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantStatement {
    pub privileges: Vec<String>,
    pub target: String,
    /// Everything after `TO`
    pub grantee: String,
}

impl GrantStatement {
    pub fn parse(statement: &str) -> Option<Self> {
        let caps = GRANT_RE.captures(statement)?;
        Some(Self {
            privileges: split_privileges(&caps[1]),
            target: caps[2].to_string(),
            grantee: caps[3].to_string(),
        })
    }

    pub fn render(&self) -> String {
        format!(
            "GRANT {} ON {} TO {}",
            self.privileges.join(", "),
            self.target,
            self.grantee
        )
    }

    /// Schema of a `` `db`.* `` target
    pub fn schema_level(&self) -> Option<String> {
        let target = self.target.trim();
        let schema = target.strip_suffix(".*")?;
        if schema == "*" {
            return None;
        }
        split_qualified(schema)
            .ok()
            .and_then(|mut parts| (parts.len() == 1).then(|| parts.remove(0)))
    }

    /// `(kind, schema, name)` of a `PROCEDURE`/`FUNCTION` target
    pub fn routine(&self) -> Option<(RoutineKind, String, String)> {
        let target = self.target.trim();
        let (kind, rest) = if let Some(rest) = strip_keyword(target, "PROCEDURE") {
            (RoutineKind::Procedure, rest)
        } else {
            (RoutineKind::Function, strip_keyword(target, "FUNCTION")?)
        };
        let mut parts = split_qualified(rest.trim()).ok()?;
        if parts.len() != 2 {
            return None;
        }
        let name = parts.pop()?;
        Some((kind, parts.pop()?, name))
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) && text[keyword.len()..].starts_with(char::is_whitespace) {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

/// Split a privilege list on commas outside column lists
fn split_privileges(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn privilege_name(privilege: &str) -> String {
    privilege
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase()
}

fn has_wildcard(schema: &str) -> bool {
    schema.contains('%') || schema.contains('_')
}

fn unescape_wildcards(target: &str) -> String {
    target.replace("\\_", "_").replace("\\%", "%")
}

fn routine_exists(catalog: &Catalog, kind: RoutineKind, schema: &str, name: &str) -> Option<bool> {
    if !catalog.schemas.iter().any(|s| s.name == schema) {
        return None;
    }
    Some(catalog.routines.iter().any(|r| {
        r.kind == kind && r.name.eq_ignore_ascii_case(name) && catalog.schema(r.schema).name == schema
    }))
}

/// Check and rewrite accounts and grants
pub fn apply(compat: &Compatibility, catalog: &mut Catalog, issues: &mut Vec<Issue>) {
    let users = std::mem::take(&mut catalog.users);
    let mut kept = Vec::with_capacity(users.len());
    for user in users {
        if let Some(user) = account(compat, catalog, user, issues) {
            kept.push(user);
        }
    }
    catalog.users = kept;
}

fn account(
    compat: &Compatibility,
    catalog: &Catalog,
    mut user: User,
    issues: &mut Vec<Issue>,
) -> Option<User> {
    let account = user.account();

    if !user.is_role {
        let unsupported_plugin = !SUPPORTED_PLUGINS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&user.plugin));
        let problem = if unsupported_plugin {
            Some(format!(
                "is using an unsupported authentication plugin '{}'",
                user.plugin
            ))
        } else if !user.has_password {
            Some("does not have a password set".to_string())
        } else {
            None
        };
        if let Some(problem) = problem {
            if compat.has(CompatToken::SkipInvalidAccounts) {
                issues.push(Issue::notice(&account, format!("{}, this account has been removed from the dump", problem)));
                return None;
            }
            if compat.ocimds {
                issues.push(Issue::error(
                    &account,
                    format!("{} (fix this with 'skip_invalid_accounts' compatibility option)", problem),
                ));
            }
        }
    }

    let set_any_definer = compat.target_version() >= SET_ANY_DEFINER_VERSION;
    let partial_revokes = catalog.server.partial_revokes;
    let mut grants = Vec::with_capacity(user.grants.len());
    for statement in std::mem::take(&mut user.grants) {
        let Some(mut grant) = GrantStatement::parse(&statement) else {
            grants.push(statement);
            continue;
        };

        if let Some((kind, schema, name)) = grant.routine() {
            if routine_exists(catalog, kind, &schema, &name) == Some(false) {
                let message = format!(
                    "has a grant statement on a {} which does not exist ({})",
                    kind.keyword().to_ascii_lowercase(),
                    statement
                );
                if compat.has(CompatToken::StripInvalidGrants) {
                    issues.push(Issue::notice(&account, format!("{}, this grant has been removed", message)));
                    continue;
                }
                if compat.ocimds {
                    issues.push(Issue::error(
                        &account,
                        format!("{} (fix this with 'strip_invalid_grants' compatibility option)", message),
                    ));
                } else {
                    issues.push(Issue::warning(&account, message));
                }
            }
        }

        let restricted: Vec<String> = grant
            .privileges
            .iter()
            .filter(|p| RESTRICTED_PRIVILEGES.contains(&privilege_name(p).as_str()))
            .map(|p| privilege_name(p))
            .collect();
        if !restricted.is_empty() {
            if compat.has(CompatToken::StripRestrictedGrants) {
                let mut removed = Vec::new();
                grant.privileges.retain(|p| {
                    let name = privilege_name(p);
                    let keep = !RESTRICTED_PRIVILEGES.contains(&name.as_str());
                    if !keep {
                        removed.push(name);
                    }
                    keep
                });
                if set_any_definer && removed.iter().any(|p| p == "SET_USER_ID") {
                    grant.privileges.push("SET_ANY_DEFINER".to_string());
                    removed.retain(|p| p != "SET_USER_ID");
                    issues.push(Issue::notice(&account, "SET_USER_ID privilege replaced with SET_ANY_DEFINER"));
                }
                if !removed.is_empty() {
                    issues.push(Issue::notice(
                        &account,
                        format!("had restricted privileges ({}) removed", removed.join(", ")),
                    ));
                }
                if grant.privileges.is_empty() {
                    continue;
                }
            } else if compat.ocimds {
                issues.push(Issue::error(
                    &account,
                    format!(
                        "is granted restricted privileges: {} (fix this with 'strip_restricted_grants' compatibility option)",
                        restricted.join(", ")
                    ),
                ));
            }
        }

        if let Some(schema) = grant.schema_level().filter(|s| !partial_revokes && has_wildcard(s)) {
            let escaped = schema.contains("\\_") || schema.contains("\\%");
            if compat.has(CompatToken::UnescapeWildcardGrants) {
                if escaped {
                    grant.target = unescape_wildcards(&grant.target);
                    issues.push(Issue::notice(
                        &account,
                        format!("wildcard grant on schema '{}' was unescaped", schema),
                    ));
                }
            } else if compat.has(CompatToken::IgnoreWildcardGrants) {
                issues.push(Issue::notice(
                    &account,
                    format!(
                        "has a wildcard grant on schema '{}', it is loaded as is and refers to a single schema when partial_revokes is enabled",
                        schema
                    ),
                ));
            } else if compat.ocimds {
                issues.push(Issue::error(
                    &account,
                    format!(
                        "has a wildcard grant statement at the database level ({}) (fix this with 'ignore_wildcard_grants' or 'unescape_wildcard_grants' compatibility options)",
                        statement
                    ),
                ));
            }
        }

        grants.push(grant.render());
    }
    user.grants = grants;
    Some(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Routine, Schema, SqlSecurity};

    fn user(name: &str, plugin: &str, grants: &[&str]) -> User {
        User {
            user: name.into(),
            host: "%".into(),
            plugin: plugin.into(),
            has_password: true,
            is_role: false,
            create: String::new(),
            grants: grants.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn catalog(users: Vec<User>) -> Catalog {
        let mut c = Catalog::default();
        let s = c.add_schema(Schema::new("app"));
        c.add_routine(Routine {
            schema: s,
            name: "p1".into(),
            kind: RoutineKind::Procedure,
            definer: String::new(),
            security: SqlSecurity::Definer,
            language: "SQL".into(),
            libraries: vec![],
            ddl: String::new(),
        });
        c.users = users;
        c
    }

    fn compat(ocimds: bool, tokens: &[CompatToken]) -> Compatibility {
        Compatibility {
            tokens: tokens.iter().copied().collect(),
            ocimds,
            target: Some(Version::new(8, 4, 0)),
            skip_upgrade_checks: false,
        }
    }

    #[test]
    fn test_parse_grant() {
        let g = GrantStatement::parse("GRANT SELECT (`a`, `b`), INSERT ON `app`.`t` TO `u`@`%`").unwrap();
        assert_eq!(g.privileges, vec!["SELECT (`a`, `b`)", "INSERT"]);
        assert_eq!(g.target, "`app`.`t`");
        assert!(GrantStatement::parse("GRANT `r1`@`%` TO `u`@`%`").is_none());
        let g = GrantStatement::parse("GRANT EXECUTE ON PROCEDURE `app`.`p2` TO `u`@`%`").unwrap();
        assert_eq!(
            g.routine(),
            Some((RoutineKind::Procedure, "app".to_string(), "p2".to_string()))
        );
        let g = GrantStatement::parse("GRANT ALL PRIVILEGES ON `db\\_1`.* TO `u`@`%`").unwrap();
        assert_eq!(g.schema_level().as_deref(), Some("db\\_1"));
    }

    #[test]
    fn test_ocimds_errors_without_tokens() {
        let mut c = catalog(vec![
            user("app", "caching_sha2_password", &[
                "GRANT SELECT, RELOAD, SUPER ON *.* TO `app`@`%`",
                "GRANT EXECUTE ON PROCEDURE `app`.`p2` TO `app`@`%`",
                "GRANT SELECT ON `db\\_%`.* TO `app`@`%`",
            ]),
            user("sock", "auth_socket", &[]),
        ]);
        let mut issues = Vec::new();
        apply(&compat(true, &[]), &mut c, &mut issues);
        assert_eq!(issues.iter().filter(|i| i.is_error()).count(), 4);
        assert_eq!(c.users.len(), 2);
    }

    #[test]
    fn test_fixes() {
        let mut c = catalog(vec![
            user("app", "caching_sha2_password", &[
                "GRANT SELECT, RELOAD, SET_USER_ID ON *.* TO `app`@`%`",
                "GRANT SUPER ON *.* TO `app`@`%`",
                "GRANT EXECUTE ON PROCEDURE `app`.`p2` TO `app`@`%`",
                "GRANT EXECUTE ON PROCEDURE `app`.`p1` TO `app`@`%`",
                "GRANT SELECT ON `db\\_1`.* TO `app`@`%`",
                "GRANT `r1`@`%` TO `app`@`%`",
            ]),
            user("sock", "auth_socket", &[]),
        ]);
        let mut issues = Vec::new();
        apply(
            &compat(
                true,
                &[
                    CompatToken::StripRestrictedGrants,
                    CompatToken::StripInvalidGrants,
                    CompatToken::SkipInvalidAccounts,
                    CompatToken::UnescapeWildcardGrants,
                ],
            ),
            &mut c,
            &mut issues,
        );
        assert!(!issues.iter().any(|i| i.is_error()));
        assert_eq!(c.users.len(), 1);
        assert_eq!(
            c.users[0].grants,
            vec![
                "GRANT SELECT, SET_ANY_DEFINER ON *.* TO `app`@`%`",
                "GRANT EXECUTE ON PROCEDURE `app`.`p1` TO `app`@`%`",
                "GRANT SELECT ON `db_1`.* TO `app`@`%`",
                "GRANT `r1`@`%` TO `app`@`%`",
            ]
        );
    }
}
