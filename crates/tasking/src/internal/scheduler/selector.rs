use std::sync::LazyLock;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::multispace0;
use nom::combinator::{all_consuming, map, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::delimited;
use regex::Regex;

use crate::internal::common::Map;
use crate::internal::common::error::SoftError;
use crate::internal::model::subject::Subject;
use crate::internal::store::Store;

/// `<predicate>:<ref>`; the ref stops at whitespace and operators.
static PREDICATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+):([^\s()!&|]+)").expect("valid regex"));

/// Named boolean test referenced from a selector.
pub trait Predicate {
    fn matches(&self, reference: &str) -> crate::Result<bool>;
}

/// Evaluates addon and extension selectors for one task.
pub struct Selector<'a> {
    predicates: Map<&'static str, Box<dyn Predicate + 'a>>,
}

impl<'a> Selector<'a> {
    pub fn new(store: &'a dyn Store, subject: Option<Subject>) -> Self {
        let mut selector = Selector::empty();
        selector.register("tag", TagPredicate { store, subject });
        selector.register("platform", PlatformPredicate { store, subject });
        selector
    }

    pub fn empty() -> Self {
        Selector {
            predicates: Map::default(),
        }
    }

    pub fn register(&mut self, name: &'static str, predicate: impl Predicate + 'a) {
        self.predicates.insert(name, Box::new(predicate));
    }

    /// Evaluates the selector. The empty selector matches.
    ///
    /// Every predicate reference is resolved first and substituted into the
    /// expression (longest references first); the result is then parsed and
    /// evaluated.
    pub fn matches(&self, selector: &str) -> crate::Result<bool> {
        if selector.trim().is_empty() {
            return Ok(true);
        }
        let not_valid = |reason: String| SoftError::SelectorNotValid {
            selector: selector.to_string(),
            reason,
        };
        let mut resolved: Map<String, bool> = Map::default();
        for captures in PREDICATE_REGEX.captures_iter(selector) {
            let token = &captures[0];
            let name = &captures[1];
            if resolved.contains_key(token) {
                continue;
            }
            let Some(predicate) = self.predicates.get(name) else {
                return Err(not_valid(format!("Predicate '{name}' not supported")).into());
            };
            resolved.insert(token.to_string(), predicate.matches(&captures[2])?);
        }
        let mut tokens: Vec<(&String, &bool)> = resolved.iter().collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        let mut expression = selector.to_string();
        for (token, matched) in tokens {
            expression = expression.replace(token.as_str(), if *matched { "true" } else { "false" });
        }
        let expr = parse(&expression).map_err(not_valid)?;
        Ok(expr.eval())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(bool),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn eval(&self) -> bool {
        match self {
            Expr::Const(value) => *value,
            Expr::Not(expr) => !expr.eval(),
            Expr::And(exprs) => exprs.iter().all(Expr::eval),
            Expr::Or(exprs) => exprs.iter().any(Expr::eval),
        }
    }
}

fn parse(expression: &str) -> Result<Expr, String> {
    all_consuming(or_expr)(expression)
        .map(|(_, expr)| expr)
        .map_err(|e| e.to_string())
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        value(Expr::Const(true), tag("true")),
        value(Expr::Const(false), tag("false")),
        delimited(tag("("), or_expr, tag(")")),
    )))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, negations) = many0(ws(tag("!")))(input)?;
    let (input, expr) = atom(input)?;
    let expr = negations
        .iter()
        .fold(expr, |expr, _| Expr::Not(Box::new(expr)));
    Ok((input, expr))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    map(separated_list1(ws(tag("&&")), term), |mut exprs| {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        }
    })(input)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    map(separated_list1(ws(tag("||")), and_expr), |mut exprs| {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::Or(exprs)
        }
    })(input)
}

/// Splits `key=value`; the value is empty when missing.
fn split_ref(reference: &str) -> (&str, &str) {
    reference.split_once('=').unwrap_or((reference, ""))
}

/// `tag:<category>[=<name>]`: the application has a tag in the category
/// (with the name, when given).
struct TagPredicate<'a> {
    store: &'a dyn Store,
    subject: Option<Subject>,
}

impl Predicate for TagPredicate<'_> {
    fn matches(&self, reference: &str) -> crate::Result<bool> {
        let (category, name) = split_ref(reference);
        let Some(category) = self.store.tag_category_by_name(category)? else {
            log::info!("TagSelector: category '{category}' not found.");
            return Ok(false);
        };
        let application = match self.subject.and_then(|s| s.application()) {
            Some(id) => self.store.application(id)?,
            None => None,
        };
        let Some(application) = application else {
            log::info!("TagSelector: application not found, subject: {:?}", self.subject);
            return Ok(false);
        };
        for id in &application.tags {
            if let Some(tag) = self.store.tag(*id)? {
                if tag.category == category.id && (name.is_empty() || tag.name == name) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// `platform:kind=<kind>`: the platform is of the kind.
struct PlatformPredicate<'a> {
    store: &'a dyn Store,
    subject: Option<Subject>,
}

impl Predicate for PlatformPredicate<'_> {
    fn matches(&self, reference: &str) -> crate::Result<bool> {
        let (key, kind) = split_ref(reference);
        if key != "kind" {
            log::info!("PlatformSelector: key '{key}' not supported.");
            return Ok(false);
        }
        let platform = match self.subject.and_then(|s| s.platform()) {
            Some(id) => self.store.platform(id)?,
            None => None,
        };
        Ok(platform.is_some_and(|p| p.kind == kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::model::subject::{Application, Platform, Tag, TagCategory};
    use crate::internal::store::MemoryStore;
    use std::cell::Cell;

    struct Fixed(bool);

    impl Predicate for Fixed {
        fn matches(&self, _reference: &str) -> crate::Result<bool> {
            Ok(self.0)
        }
    }

    struct Counting<'a>(&'a Cell<u32>);

    impl Predicate for Counting<'_> {
        fn matches(&self, reference: &str) -> crate::Result<bool> {
            self.0.set(self.0.get() + 1);
            Ok(reference == "yes")
        }
    }

    fn fixed() -> Selector<'static> {
        let mut selector = Selector::empty();
        selector.register("yes", Fixed(true));
        selector.register("no", Fixed(false));
        selector
    }

    #[test]
    fn test_selector_empty_matches() {
        assert!(fixed().matches("").unwrap());
        assert!(fixed().matches("   ").unwrap());
    }

    #[test]
    fn test_selector_operators() {
        let selector = fixed();
        assert!(selector.matches("yes:a").unwrap());
        assert!(!selector.matches("no:a").unwrap());
        assert!(selector.matches("!no:a").unwrap());
        assert!(selector.matches("!!yes:a").unwrap());
        assert!(selector.matches("no:a || yes:b").unwrap());
        assert!(!selector.matches("no:a && yes:b").unwrap());
        // && binds tighter than ||.
        assert!(selector.matches("yes:a || yes:b && no:c").unwrap());
        assert!(!selector.matches("(yes:a || yes:b) && no:c").unwrap());
        assert!(selector.matches("!(no:a) && (yes:b)").unwrap());
        assert!(selector.matches("true && !false").unwrap());
    }

    #[test]
    fn test_selector_laws() {
        let selector = fixed();
        for (a, b) in [("yes:a", "no:b"), ("no:a", "yes:b"), ("yes:a", "yes:b")] {
            let and = selector.matches(&format!("{a} && {b}")).unwrap();
            let not_or = selector.matches(&format!("!(!{a} || !{b})")).unwrap();
            assert_eq!(and, not_or);
            let or = selector.matches(&format!("{a} || {b}")).unwrap();
            let swapped = selector.matches(&format!("{b} || {a}")).unwrap();
            assert_eq!(or, swapped);
        }
    }

    #[test]
    fn test_selector_resolves_each_token_once() {
        let count = Cell::new(0);
        let mut selector = Selector::empty();
        selector.register("p", Counting(&count));
        assert!(selector.matches("p:yes || p:yes && p:no").unwrap());
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_selector_longest_token_first() {
        let count = Cell::new(0);
        let mut selector = Selector::empty();
        selector.register("p", Counting(&count));
        // `p:yes` is a prefix of `p:yesno`; substitution must not split it.
        assert!(!selector.matches("p:yesno").unwrap());
        assert!(selector.matches("p:yesno || p:yes").unwrap());
    }

    #[test]
    fn test_selector_not_valid() {
        let selector = fixed();
        let error = selector.matches("maybe:a").unwrap_err();
        assert!(matches!(
            error.as_soft(),
            Some(SoftError::SelectorNotValid { .. })
        ));
        assert!(selector.matches("yes:a &&").unwrap_err().as_soft().is_some());
        assert!(selector.matches("(yes:a").unwrap_err().as_soft().is_some());
        assert!(selector.matches("yes:a no:b").unwrap_err().as_soft().is_some());
    }

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::TempDir::with_prefix("tasking").unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        store.insert_tag_category(TagCategory {
            id: 1.into(),
            name: "Language".into(),
        });
        store.insert_tag_category(TagCategory {
            id: 2.into(),
            name: "Runtime".into(),
        });
        store.insert_tag(Tag {
            id: 10.into(),
            name: "Java".into(),
            category: 1.into(),
        });
        store.insert_application(Application {
            id: 1.into(),
            name: "app".into(),
            tags: vec![10.into()],
            ..Default::default()
        });
        store.insert_platform(Platform {
            id: 1.into(),
            name: "ocp".into(),
            kind: "openshift".into(),
        });
        (dir, store)
    }

    #[test]
    fn test_tag_predicate() {
        let (_dir, store) = store();
        let selector = Selector::new(&store, Some(Subject::Application(1.into())));
        assert!(selector.matches("tag:Language=Java").unwrap());
        assert!(selector.matches("tag:Language").unwrap());
        assert!(!selector.matches("tag:Language=Go").unwrap());
        assert!(!selector.matches("tag:Runtime").unwrap());
        assert!(!selector.matches("tag:Unknown=x").unwrap());
        assert!(selector.matches("tag:Language=Java || !tag:Language").unwrap());

        let selector = Selector::new(&store, Some(Subject::Application(2.into())));
        assert!(!selector.matches("tag:Language").unwrap());
    }

    #[test]
    fn test_platform_predicate() {
        let (_dir, store) = store();
        let selector = Selector::new(&store, Some(Subject::Platform(1.into())));
        assert!(selector.matches("platform:kind=openshift").unwrap());
        assert!(!selector.matches("platform:kind=kubernetes").unwrap());
        assert!(!selector.matches("platform:name=ocp").unwrap());
        let selector = Selector::new(&store, None);
        assert!(!selector.matches("platform:kind=openshift").unwrap());
    }
}
