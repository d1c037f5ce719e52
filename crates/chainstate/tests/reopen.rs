mod common;

use std::fs;
use std::path::Path;

use common::{append, fork_file_count, open_regtest, HeaderTree};
use spv_chainstate::store::fork_file_name;
use spv_chainstate::ChainError;

fn build_swapped_tree(dir: &Path, tree: &HeaderTree) {
    let registry = open_regtest(dir);
    let chain_u = registry.best_chain();
    append(&chain_u, tree, "ABCDEFOPQRSTU");
    let chain_l = chain_u.fork(tree.get('G')).expect("fork G");
    append(&chain_l, tree, "HIJKL");
    let chain_z = chain_l.fork(tree.get('M')).expect("fork M");
    append(&chain_z, tree, "NXYZ");
}

fn headers_bytes(tree: &HeaderTree, letters: &str) -> Vec<u8> {
    letters
        .chars()
        .flat_map(|letter| tree.get(letter).serialize())
        .collect()
}

#[test]
fn reopening_restores_every_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    build_swapped_tree(dir.path(), &tree);

    let registry = open_regtest(dir.path());
    assert_eq!(registry.len(), 3);
    let best = registry.best_chain();
    assert_eq!(best.height().unwrap(), 13);
    assert_eq!(best.get_hash(9).unwrap(), tree.hash('M'));

    let chain_u = registry.get_by_hash(&tree.hash('O')).expect("chain U");
    assert_eq!(chain_u.forkpoint().unwrap(), 6);
    assert_eq!(chain_u.height().unwrap(), 12);
    assert_eq!(chain_u.parent().unwrap(), Some(best.clone()));

    let chain_l = registry.get_by_hash(&tree.hash('J')).expect("chain L");
    assert_eq!(chain_l.forkpoint().unwrap(), 9);
    assert_eq!(chain_l.height().unwrap(), 11);
    assert_eq!(chain_l.get_hash(8).unwrap(), tree.hash('I'));
    assert_eq!(chain_l.get_height_of_last_common_block_with_chain(&chain_u).unwrap(), 5);
}

#[test]
fn second_open_is_refused_while_locked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let _registry = open_regtest(dir.path());
    let err = spv_chainstate::ChainRegistry::open_with_params(dir.path(), common::regtest())
        .expect_err("locked");
    assert!(matches!(err, ChainError::DirectoryLocked(_)));
}

#[test]
fn invalid_fork_files_are_deleted_on_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    build_swapped_tree(dir.path(), &tree);
    let forks = dir.path().join("forks");

    fs::write(forks.join("fork2_bad"), headers_bytes(&tree, "O")).expect("write");
    let redundant = fork_file_name(6, &tree.hash('F'), &tree.hash('G'));
    fs::write(forks.join(&redundant), headers_bytes(&tree, "GHI")).expect("write");
    let mismatched = fork_file_name(7, &tree.hash('O'), &tree.hash('Q'));
    fs::write(forks.join(&mismatched), headers_bytes(&tree, "P")).expect("write");
    let orphan = fork_file_name(4, &[0x42; 32], &tree.hash('E'));
    fs::write(forks.join(&orphan), headers_bytes(&tree, "E")).expect("write");
    fs::write(forks.join("leftover.tmp"), b"partial").expect("write");

    let registry = open_regtest(dir.path());
    assert_eq!(registry.len(), 3);
    assert_eq!(fork_file_count(dir.path()), 2);
    assert!(!forks.join(&redundant).exists());
    assert!(!forks.join(&mismatched).exists());
    assert!(!forks.join(&orphan).exists());
}

#[test]
fn interrupted_swap_before_rewrite_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    {
        let registry = open_regtest(dir.path());
        let chain_u = registry.best_chain();
        append(&chain_u, &tree, "ABCDEFOPQR");
        let chain_l = chain_u.fork(tree.get('G')).expect("fork G");
        append(&chain_l, &tree, "HIJ");
    }
    let staged = fork_file_name(6, &tree.hash('F'), &tree.hash('O'));
    fs::write(
        dir.path().join("forks").join(format!("{staged}.tmp")),
        headers_bytes(&tree, "OPQR"),
    )
    .expect("stage");

    let registry = open_regtest(dir.path());
    assert_eq!(registry.len(), 2);
    assert_eq!(fork_file_count(dir.path()), 1);
    let best = registry.best_chain();
    assert_eq!(best.get_hash(9).unwrap(), tree.hash('R'));
    let fork = registry.get_by_hash(&tree.hash('G')).expect("fork G");
    assert_eq!(fork.height().unwrap(), 9);
}

#[test]
fn interrupted_swap_after_rewrite_is_completed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    {
        let registry = open_regtest(dir.path());
        let chain_u = registry.best_chain();
        append(&chain_u, &tree, "ABCDEFOPQR");
        let chain_l = chain_u.fork(tree.get('G')).expect("fork G");
        append(&chain_l, &tree, "HIJK");
        assert_eq!(registry.best_chain(), chain_l);
    }
    let forks = dir.path().join("forks");
    let demoted = fork_file_name(6, &tree.hash('F'), &tree.hash('O'));
    fs::rename(forks.join(&demoted), forks.join(format!("{demoted}.tmp"))).expect("unstage");
    let child = fork_file_name(6, &tree.hash('F'), &tree.hash('G'));
    fs::write(forks.join(&child), headers_bytes(&tree, "GHIJK")).expect("restore child");

    let registry = open_regtest(dir.path());
    assert_eq!(registry.len(), 2);
    assert!(forks.join(&demoted).exists());
    assert!(!forks.join(&child).exists());
    assert_eq!(registry.best_chain().height().unwrap(), 10);
    let chain_u = registry.get_by_hash(&tree.hash('O')).expect("chain U");
    assert_eq!(chain_u.height().unwrap(), 9);
}

#[test]
fn fork_extending_the_tip_is_merged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    {
        let registry = open_regtest(dir.path());
        append(&registry.best_chain(), &tree, "ABCDEF");
    }
    let name = fork_file_name(6, &tree.hash('F'), &tree.hash('G'));
    fs::write(dir.path().join("forks").join(name), headers_bytes(&tree, "GH")).expect("write");

    let registry = open_regtest(dir.path());
    assert_eq!(registry.len(), 1);
    assert_eq!(fork_file_count(dir.path()), 0);
    let best = registry.best_chain();
    assert_eq!(best.height().unwrap(), 7);
    assert_eq!(best.get_hash(7).unwrap(), tree.hash('H'));
}

#[test]
fn damaged_main_file_is_repaired() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tree = HeaderTree::new();
    {
        let registry = open_regtest(dir.path());
        append(&registry.best_chain(), &tree, "ABC");
    }
    let main = dir.path().join("blockchain_headers");
    let mut bytes = fs::read(&main).expect("read");
    bytes.extend_from_slice(&[7u8; 40]);
    fs::write(&main, &bytes).expect("write");
    {
        let registry = open_regtest(dir.path());
        assert_eq!(registry.best_chain().height().unwrap(), 2);
    }

    let mut bytes = headers_bytes(&tree, "A");
    bytes.extend_from_slice(&headers_bytes(&tree, "O"));
    fs::write(&main, &bytes).expect("write");
    {
        let registry = open_regtest(dir.path());
        assert_eq!(registry.best_chain().height().unwrap(), 0);
    }

    fs::write(&main, headers_bytes(&tree, "BC")).expect("write");
    let registry = open_regtest(dir.path());
    assert_eq!(registry.best_chain().height().unwrap(), -1);
}
