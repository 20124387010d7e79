//! Interactive shell over a [`TableIndex`]: load a comma-separated table,
//! choose two key columns, then build, query, and print the B+ tree index
//! from a numbered menu.

use std::collections::VecDeque;
use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use ivy_tree::{CompositeKey, NodeRef, Table, TableIndex, TupleId};

const MENU: &str = "
======== B+ tree program =======
1. LOAD
2. PRINT
3. INSERT
4. DELETE
5. SEARCH
6. RANGE_SEARCH
7. EXIT
================================";

fn main() -> ExitCode {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| String::from("orders.csv"));
    let table = match Table::open(&path) {
        Ok(table) => table,
        Err(error) => {
            eprintln!("cannot open table {path}: {error}");
            return ExitCode::FAILURE;
        }
    };

    let stdin = io::stdin();
    // `run` returns None when stdin is exhausted, which ends the session the
    // same way EXIT does.
    if run(&mut stdin.lock(), table).is_none() {
        println!();
    }
    ExitCode::SUCCESS
}

fn run(input: &mut impl BufRead, table: Table) -> Option<()> {
    println!("Choose two attributes which will serve as key for the database.");
    for (number, attribute) in table.attributes().iter().enumerate() {
        println!("{}: {}", number + 1, attribute);
    }
    let width = table.attributes().len();
    let first = prompt_column(input, "Please enter the attribute number for the first key: ", width)?;
    let second = prompt_column(input, "Please enter the attribute number for the second key: ", width)?;
    let mut index = TableIndex::new(table, first - 1, second - 1).expect("column numbers were validated");

    loop {
        println!("{MENU}");
        let selection = prompt(input, "SELECT MENU: ")?;
        match selection.parse() {
            Ok(1) => load(input, &mut index)?,
            Ok(2) => print_tree(&index),
            Ok(3) => insert(input, &mut index)?,
            Ok(4) => delete(input, &mut index)?,
            Ok(5) => search(input, &index)?,
            Ok(6) => range_search(input, &index)?,
            Ok(7) => break,
            Ok(_) | Err(_) => println!("PLEASE ENTER NUMBER IN RANGE (1-7)"),
        }
    }
    Some(())
}

fn load(input: &mut impl BufRead, index: &mut TableIndex) -> Option<()> {
    println!("=========== LOAD ============");
    let start = prompt_number(input, "LOAD_START_TID: ")?;
    let end = prompt_number(input, "LOAD_END_TID: ")?;
    println!("LOADING...");
    match index.load(start, end) {
        Ok(_) => println!("B+ Tree is built"),
        Err(error) => println!("LOAD failed: {error}"),
    }
    Some(())
}

/// Dumps the tree level by level, leaves rendered with their buckets and
/// internal nodes with their separator keys.
fn print_tree(index: &TableIndex) {
    println!("========== PRINT ============");
    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((index.tree().root(), 1));
    while let Some((node, level)) = queue.pop_front() {
        if levels.len() < level {
            levels.push(Vec::new());
        }
        levels[level - 1].push(render_node(node));
        for child in 0..node.child_count() {
            queue.push_back((node.child(child), level + 1));
        }
    }
    for (level, nodes) in levels.iter().enumerate() {
        println!("Level {}: [{}]", level + 1, nodes.join(", "));
    }
}

fn render_node(node: NodeRef<'_, CompositeKey, TupleId>) -> String {
    if node.is_leaf() {
        let entries: Vec<(&CompositeKey, &[TupleId])> =
            (0..node.keys().len()).map(|slot| (&node.keys()[slot], node.bucket(slot))).collect();
        format!("{entries:?}")
    } else {
        format!("{:?}", node.keys())
    }
}

fn insert(input: &mut impl BufRead, index: &mut TableIndex) -> Option<()> {
    println!("========== INSERT ===========");
    let id = prompt_number(input, "TUPLE ID: ")?;
    match index.insert(id) {
        Ok(()) => println!("Tuple #{id} is inserted"),
        Err(error) => println!("INSERT failed: {error}"),
    }
    Some(())
}

fn delete(input: &mut impl BufRead, index: &mut TableIndex) -> Option<()> {
    println!("========== DELETE ===========");
    let id = prompt_number(input, "TUPLE ID: ")?;
    match index.delete(id) {
        Ok(true) => println!("Tuple #{id} is deleted"),
        Ok(false) => println!("Tuple #{id} was not in the index"),
        Err(error) => println!("DELETE failed: {error}"),
    }
    Some(())
}

fn search(input: &mut impl BufRead, index: &TableIndex) -> Option<()> {
    println!("========== SEARCH ===========");
    println!("Please enter the key without extra whitespaces\nin the format:\n(key1,key2)\n");
    let key = loop {
        let line = prompt(input, "SEARCH KEY: ")?;
        match parse_key(&line) {
            Some(key) => break key,
            None => println!("MALFORMED KEY, EXPECTED (key1,key2)"),
        }
    };
    let ids = index.search(&key);
    println!("Found tuple IDs: {ids:?}");
    print_tuples(index, ids);
    Some(())
}

fn range_search(input: &mut impl BufRead, index: &TableIndex) -> Option<()> {
    println!("======== RANGE SEARCH =======");
    println!("Please enter the range of keys without extra whitespaces\nin the format:\n[(key1,key2),(key3,key4)]\n");
    let (low, high) = loop {
        let line = prompt(input, "SEARCH RANGE: ")?;
        match parse_range(&line) {
            Some(range) => break range,
            None => println!("MALFORMED RANGE, EXPECTED [(key1,key2),(key3,key4)]"),
        }
    };
    let pairs: Vec<(CompositeKey, Vec<TupleId>)> =
        index.range_search(low, high).map(|(key, ids)| (key.clone(), ids.to_vec())).collect();
    println!("Found pairs: {pairs:?}");
    let ids: Vec<TupleId> = pairs.iter().flat_map(|(_, ids)| ids.iter().copied()).collect();
    print_tuples(index, &ids);
    Some(())
}

fn print_tuples(index: &TableIndex, ids: &[TupleId]) {
    println!("Attributes: < {} >", index.table().attributes().join(", "));
    for &id in ids {
        match index.table().tuple(id) {
            Ok(tuple) => println!("Tuple #{id}: < {} >", tuple.join(", ")),
            Err(error) => println!("Tuple #{id}: {error}"),
        }
    }
}

/// Prints a prompt and reads one trimmed line; `None` on end of input.
fn prompt(input: &mut impl BufRead, label: &str) -> Option<String> {
    print!("{label}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    if input.read_line(&mut line).ok()? == 0 {
        return None;
    }
    Some(line.trim().to_string())
}

fn prompt_number(input: &mut impl BufRead, label: &str) -> Option<usize> {
    loop {
        let line = prompt(input, label)?;
        match line.parse() {
            Ok(number) => return Some(number),
            Err(_) => println!("PLEASE ENTER A NUMBER"),
        }
    }
}

fn prompt_column(input: &mut impl BufRead, label: &str, width: usize) -> Option<usize> {
    loop {
        let number = prompt_number(input, label)?;
        if (1..=width).contains(&number) {
            return Some(number);
        }
        println!("PLEASE ENTER NUMBER IN RANGE (1-{width})");
    }
}

/// Parses `(key1,key2)`, splitting on the first comma.
fn parse_key(text: &str) -> Option<CompositeKey> {
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    let (first, second) = inner.split_once(',')?;
    if first.is_empty() || second.is_empty() {
        return None;
    }
    Some((first.to_string(), second.to_string()))
}

/// Parses `[(key1,key2),(key3,key4)]`, splitting the pair on the first `),(`.
fn parse_range(text: &str) -> Option<(CompositeKey, CompositeKey)> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    let (low, high) = inner.split_once("),(")?;
    let low = parse_key(&format!("{low})"))?;
    let high = parse_key(&format!("({high}"))?;
    Some((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_expressions_parse_or_reprompt() {
        assert_eq!(parse_key("(a,b)"), Some(("a".to_string(), "b".to_string())));
        assert_eq!(parse_key("(a,b,c)"), Some(("a".to_string(), "b,c".to_string())));
        assert_eq!(parse_key("a,b"), None);
        assert_eq!(parse_key("(a)"), None);
        assert_eq!(parse_key("(,b)"), None);
    }

    #[test]
    fn range_expressions_parse_or_reprompt() {
        assert_eq!(
            parse_range("[(a,b),(c,d)]"),
            Some((("a".to_string(), "b".to_string()), ("c".to_string(), "d".to_string())))
        );
        assert_eq!(parse_range("[(a,b)]"), None);
        assert_eq!(parse_range("(a,b),(c,d)"), None);
    }
}
