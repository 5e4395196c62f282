mod common;

use std::fs;
use std::sync::Arc;

use common::{ProblemTree, CHALLENGE};
use prologin_correction::{
    error::ProblemError,
    models::{Language, TestType},
    services::problem_repository::ProblemRepository,
};

#[test]
fn loads_problem_with_sorted_classified_tests() {
    let tree = ProblemTree::new();
    tree.add_problem(
        "sum",
        "title: Sum\ndifficulty: 3\nperformance: zbig\nhidden: b\nstop-early: false\n",
        &[
            ("b", "1 1\n", "2\n"),
            ("zbig", "9 9\n", "18\n"),
            ("a", "0 0\n", "0\n"),
        ],
    );
    let repository = ProblemRepository::new(tree.root());

    let problem = repository.load(CHALLENGE, "sum").unwrap();

    assert_eq!(problem.title(), "Sum");
    assert_eq!(problem.difficulty(), 3);
    assert!(!problem.stop_early());
    let names: Vec<_> = problem.tests().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "zbig"]);
    assert_eq!(problem.test("zbig").unwrap().test_type, TestType::Performance);
    assert_eq!(problem.test("a").unwrap().test_type, TestType::Correction);
    assert!(problem.test("b").unwrap().hidden);
    assert_eq!(problem.test("b").unwrap().stdout, "2\n");
    assert_eq!(problem.correction_tests().count(), 2);
}

#[test]
fn unpaired_fixtures_are_ignored() {
    let tree = ProblemTree::new();
    tree.add_problem("echo", "difficulty: 1\n", &[("t1", "x\n", "x\n")]);
    let test_dir = tree.root().join(CHALLENGE).join("echo").join("test");
    fs::write(test_dir.join("lonely.in"), "no output\n").unwrap();
    fs::write(test_dir.join("orphan.out"), "no input\n").unwrap();
    fs::write(test_dir.join("README"), "notes\n").unwrap();

    let problem = ProblemRepository::new(tree.root())
        .load(CHALLENGE, "echo")
        .unwrap();

    assert_eq!(problem.tests().len(), 1);
    assert_eq!(problem.tests()[0].name, "t1");
}

#[test]
fn missing_challenge_or_problem_is_not_found() {
    let tree = ProblemTree::new();
    tree.add_problem("echo", "difficulty: 1\n", &[]);
    let repository = ProblemRepository::new(tree.root());

    assert!(matches!(
        repository.load("other2015", "echo"),
        Err(ProblemError::NotFound(_))
    ));
    assert!(matches!(
        repository.load(CHALLENGE, "nope"),
        Err(ProblemError::NotFound(_))
    ));

    fs::remove_file(tree.root().join(CHALLENGE).join("challenge.props")).unwrap();
    assert!(matches!(
        repository.load(CHALLENGE, "echo"),
        Err(ProblemError::NotFound(_))
    ));
}

#[test]
fn malformed_properties_point_at_the_file() {
    let tree = ProblemTree::new();
    tree.add_problem("bad", "title: Bad\nthis line has no separator\n", &[]);
    tree.add_problem("negative", "difficulty: -1\n", &[]);
    let repository = ProblemRepository::new(tree.root());

    match repository.load(CHALLENGE, "bad") {
        Err(ProblemError::MalformedProperties { path, line, .. }) => {
            assert!(path.ends_with("bad/problem.props"));
            assert_eq!(line, 2);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        repository.load(CHALLENGE, "negative"),
        Err(ProblemError::MalformedProperties { .. })
    ));
}

#[test]
fn execution_limits_scale_with_language() {
    let tree = ProblemTree::new();
    tree.add_problem("limits", "time: 1000\nmem: 10000\n", &[]);
    tree.add_problem("unlimited", "difficulty: 0\n", &[]);
    let repository = ProblemRepository::new(tree.root());

    let limits = repository
        .load(CHALLENGE, "limits")
        .unwrap()
        .execution_limits(Language::C);
    assert_eq!(limits.time, Some(1.0));
    assert_eq!(limits.wall_time, Some(3.0));
    assert_eq!(limits.mem, Some(4096 + (10000 + 4096) * 2));
    assert_eq!(limits.fsize, 4000);

    let python = repository
        .load(CHALLENGE, "limits")
        .unwrap()
        .execution_limits(Language::Python);
    assert_eq!(python.time, Some(15.0));

    let none = repository
        .load(CHALLENGE, "unlimited")
        .unwrap()
        .execution_limits(Language::C);
    assert_eq!(none.time, None);
    assert_eq!(none.mem, None);
}

#[test]
fn problems_are_cached_after_first_load() {
    let tree = ProblemTree::new();
    tree.add_problem("cached", "title: Before\n", &[("t1", "1\n", "1\n")]);
    let repository = ProblemRepository::new(tree.root());

    let first = repository.load(CHALLENGE, "cached").unwrap();
    fs::write(
        tree.root().join(CHALLENGE).join("cached").join("problem.props"),
        "title: After\n",
    )
    .unwrap();
    let second = repository.load(CHALLENGE, "cached").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.title(), "Before");
}

#[tokio::test]
async fn loads_off_the_runtime() {
    let tree = ProblemTree::new();
    tree.add_problem("async", "difficulty: 2\n", &[("t1", "1\n", "1\n")]);
    let repository = Arc::new(ProblemRepository::new(tree.root()));

    let problem = repository.clone().load_async(CHALLENGE, "async").await.unwrap();
    assert_eq!(problem.difficulty(), 2);

    let err = repository.load_async(CHALLENGE, "missing").await.unwrap_err();
    assert!(matches!(err, ProblemError::NotFound(_)));
}
