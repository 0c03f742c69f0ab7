use herms::{
    Executor, HermsError, NodeConfig, Query, QuerySelector, Repository, RepositoryBackend,
    RepositoryConfig,
};
use serde_json::json;

fn sample_repo() -> Repository {
    let cfg: RepositoryConfig = serde_json::from_value(json!({
        "types": {
            "type1": {"properties": {
                "foo": {"type": "type2", "list": false},
                "bar": {"type": "type3", "list": true},
                "val": {"type": "int", "list": false}
            }},
            "type2": {"properties": {
                "text": {"type": "string", "list": true},
                "num": {"type": "int", "list": false}
            }},
            "type3": {"properties": {
                "tagcat": {"type": "tagcat", "list": true},
                "tag": {"type": "tag"}
            }}
        },
        "tags": {
            "tag1": "test tag 1",
            "tag2": "test tag 2",
            "tagcat": {"children": ["t1", "t2", "t3"]}
        },
        "states": {"s1": {}, "s2": {}, "s3": {}},
        "nodes": {
            "type1": {
                "n11": {
                    "properties": {"foo": "n21", "bar": ["n31"], "val": 4},
                    "tags": ["tag1", "t2"],
                    "state": "s1"
                },
                "n12": {
                    "properties": {"foo": "n21", "bar": ["n31", "n32"], "val": 6},
                    "state": "s1"
                }
            },
            "type2": {
                "n21": {"properties": {"text": ["text1"], "num": 10}, "state": "s1"},
                "n22": {
                    "properties": {"text": ["text1", "text2"], "num": 12},
                    "tags": ["tag2"],
                    "state": "s1"
                },
                "n23": {"properties": {"num": 12}, "state": "s1"},
                "n24": {"properties": {"num": 13}, "state": "s1"},
                "n25": {"properties": {"num": 14}, "state": "s1"}
            },
            "type3": {
                "n31": {"properties": {"tagcat": ["t1", "t2"], "tag": "tag2"}, "state": "s1"},
                "n32": {"properties": {"tagcat": ["t1"], "tag": "tag1"}, "state": "s1"}
            }
        }
    }))
    .unwrap();
    let mut repo = Repository::new();
    repo.configure(&cfg).unwrap();
    repo
}

fn names(repo: &Repository, text: &str) -> Vec<String> {
    let exec = repo.query(text).unwrap();
    exec.items()
        .map(|id| repo.get_node(id).unwrap().name.clone())
        .collect()
}

/// Reference result: test every node one by one.
fn naive(repo: &Repository, text: &str) -> Vec<String> {
    let query = Query::new(text, repo).unwrap();
    let exec = query.compile(&RepositoryBackend::new(repo)).unwrap();
    repo.all_nodes()
        .filter(|id| exec.matches(*id))
        .map(|id| repo.get_node(id).unwrap().name.clone())
        .collect()
}

#[test]
fn test_query_text_binds_to_expressions() {
    let repo = sample_repo();
    assert_eq!(Query::new("foo.num>3", &repo).unwrap().to_string(), ">(foo.num,3)");
    assert_eq!(Query::new("", &repo).unwrap().to_string(), "All");
    assert_eq!(Query::new("type1", &repo).unwrap().to_string(), "type1");
    assert_eq!(Query::new("val=6", &repo).unwrap().to_string(), "=(val,6)");
    assert_eq!(
        Query::new("text=text1 & num!=10", &repo).unwrap().to_string(),
        "&(=(text,text1),!=(num,10))"
    );
}

#[test]
fn test_all_and_type_queries() {
    let repo = sample_repo();
    assert_eq!(
        names(&repo, ""),
        vec!["n11", "n12", "n21", "n22", "n23", "n24", "n25", "n31", "n32"]
    );
    assert_eq!(names(&repo, "type1"), vec!["n11", "n12"]);
    assert_eq!(names(&repo, "s1").len(), 9);
    assert!(names(&repo, "s2").is_empty());
}

#[test]
fn test_tag_queries_follow_isa() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "tag1"), vec!["n11", "n32"]);
    assert_eq!(names(&repo, "tag2"), vec!["n22", "n31"]);
    assert_eq!(names(&repo, "t2"), vec!["n11", "n31"]);
    assert_eq!(names(&repo, "tagcat.t2"), vec!["n11", "n31"]);
    assert_eq!(names(&repo, "tagcat"), vec!["n11", "n31", "n32"]);
    assert!(names(&repo, "t3").is_empty());
}

#[test]
fn test_relational_queries() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "val=6"), vec!["n12"]);
    assert_eq!(names(&repo, "val=4,6"), vec!["n11", "n12"]);
    assert_eq!(names(&repo, "val<6"), vec!["n11"]);
    assert_eq!(names(&repo, "val<=6"), vec!["n11", "n12"]);
    assert_eq!(names(&repo, "val>4"), vec!["n12"]);
    assert_eq!(names(&repo, "text==\"text1\""), vec!["n21", "n22"]);
    assert_eq!(names(&repo, "foo.num>3"), vec!["n11", "n12"]);
    assert_eq!(names(&repo, "num!=12,13"), vec!["n21", "n25"]);
}

#[test]
fn test_match_mode_over_list_values() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "text=text1"), vec!["n21", "n22"]);
    // all-match holds vacuously for nodes without a text
    assert_eq!(names(&repo, "type2 & text&=text1"), vec!["n21", "n23", "n24", "n25"]);
    assert_eq!(names(&repo, "type3 & tagcat&=t1"), vec!["n32"]);
    assert_eq!(names(&repo, "tagcat|=t2"), vec!["n31"]);
}

#[test]
fn test_logical_queries() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "text=text1 & num!=10"), vec!["n22"]);
    assert_eq!(
        names(&repo, "type2 & !(num>11 & num<=13) | type3"),
        vec!["n21", "n25", "n31", "n32"]
    );
    assert_eq!(names(&repo, "type1 & tag1"), vec!["n11"]);
    assert_eq!(names(&repo, "!type2 & !type3"), vec!["n11", "n12"]);
}

#[test]
fn test_apply_and_reverse_paths() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "bar{tagcat=t2}"), vec!["n11", "n12"]);
    assert_eq!(names(&repo, "type1 & bar&{tagcat=t2}"), vec!["n11"]);
    assert_eq!(names(&repo, "foo{num=10}"), vec!["n11", "n12"]);
    // nodes pointed at through foo by something with val 6
    assert_eq!(names(&repo, "~foo.val=6"), vec!["n21"]);
    assert_eq!(names(&repo, "~bar{val=4}"), vec!["n31"]);
    assert_eq!(names(&repo, "type3 & ~bar&{val>0}"), vec!["n31", "n32"]);
}

#[test]
fn test_qualified_names_and_errors() {
    let repo = sample_repo();
    assert_eq!(names(&repo, "type2:n21"), vec!["n21"]);
    assert_eq!(names(&repo, "n21 | n22"), vec!["n21", "n22"]);

    for text in ["nosuch", "nosuch.path=1", "val=abc", "foo.nosuch=1", "(type1", "type1 &"] {
        assert!(
            matches!(repo.query(text), Err(HermsError::QueryFormat(_))),
            "{} should be a query format error",
            text
        );
    }
}

#[test]
fn test_planner_never_changes_results() {
    let repo = sample_repo();
    for text in [
        "",
        "type2 & num>11",
        "tagcat | type2 & num=12",
        "t1 & bar{tag=tag1} | n21",
        "!tag1 & s1",
        "type2 & !(num>11 & num<=13) | type3",
        "~bar{val>5} | tag2 & type2",
    ] {
        let mut planned = names(&repo, text);
        planned.sort();
        let mut expected = naive(&repo, text);
        expected.sort();
        assert_eq!(planned, expected, "query {}", text);
    }
}

#[test]
fn test_query_selector_picks_first_match() {
    let repo = sample_repo();
    let selector = QuerySelector::from_map(
        &repo,
        &[
            ("type1".to_string(), "thisisType1"),
            ("num>11 & num<=13".to_string(), "num"),
        ],
        "None",
    )
    .unwrap();
    let backend = RepositoryBackend::new(&repo);
    let compiled = selector.compile(&backend).unwrap();
    for (name, expected) in [
        ("n11", "thisisType1"),
        ("n12", "thisisType1"),
        ("n21", "None"),
        ("n23", "num"),
    ] {
        let node = repo.node_or_error(name, None).unwrap();
        assert_eq!(*compiled.select(node), expected);
    }
}

#[test]
fn test_mutations_keep_indexes_consistent() {
    let mut repo = sample_repo();
    repo.check_integrity().unwrap();

    let n12 = repo.node_or_error("n12", None).unwrap();
    let cfg: NodeConfig = serde_json::from_value(json!({
        "properties": {"foo": "n22", "bar": ["n32"], "val": 7},
        "state": "s2"
    }))
    .unwrap();
    repo.configure_node(n12, &cfg).unwrap();
    repo.check_integrity().unwrap();
    assert_eq!(names(&repo, "s2"), vec!["n12"]);
    assert_eq!(names(&repo, "foo{num=12}"), vec!["n12"]);

    let n32 = repo.node_or_error("n32", None).unwrap();
    repo.remove_node(n32).unwrap();
    repo.check_integrity().unwrap();
    assert_eq!(names(&repo, "bar{tag=tag1}"), Vec::<String>::new());
    assert_eq!(names(&repo, "tag1"), vec!["n11"]);

    let t2 = repo.tag("tagcat.t2").unwrap();
    repo.remove_tag(t2).unwrap();
    repo.check_integrity().unwrap();
    assert!(repo.query("t2").is_err());
    assert_eq!(names(&repo, "tagcat"), vec!["n31"]);
}

#[test]
fn test_dump_round_trips() {
    let mut repo = sample_repo();
    let n11 = repo.node_or_error("n11", None).unwrap();
    let dump = repo.dump_node(n11).unwrap();
    assert_eq!(dump.state.as_deref(), Some("s1"));
    assert_eq!(dump.properties["val"], json!(4));
    assert_eq!(dump.properties["foo"], json!("n21"));

    repo.configure_node(n11, &dump).unwrap();
    assert_eq!(repo.dump_node(n11).unwrap(), dump);
    repo.check_integrity().unwrap();
}
