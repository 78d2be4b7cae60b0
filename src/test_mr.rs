use std::path::Path;
use std::sync::Arc;

use crate::mr::{Callbacks, MapReduce, PartitionedStore, Record, StoreMode};
use crate::mrapps::prefix::MinimalPrefix;
use crate::mrrt::sequential;

pub(crate) const EMAILS: &str = "joshua5@hotmail.ru
goshua5@hotmail.ru
yog@sibmail.ru
gvozdev_r@mail.ru
alex-13@risp.ru
pavstyuk@aport.ru
Dj-Vovka@ngs.ru
vetlan@rambler.ru
lukaa@ngs.ru
sorus@ok.ru\x20
leo_shubkin@mail.ru
gurba_y@mail.ru
beer_vodka@mail.ru
K_Petrovich@ngs.ru
geokot@mail.ru
Inko_x@mail.ru
a-kalinin@ngs.ru
alexander.kalinin@ngs.ru
wil-son@mail.ru
viala@ngs.ru
azanov@ngs.ru
Lenusick@ngs.ru
Ekaterina_26@list.ru
Sib_nataly@ngs.ru
alla_z@bk.ru
skyer@mail.ru
girevajaoa@ngs.ru
lesyamag@mail.ru
galeks2003@mail.ru
lorndead@ngs.ru
";

/// Lowercased first letter of every word in `text`.
pub(crate) fn first_letters(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.chars().take(1).collect::<String>().to_lowercase())
        .collect()
}

const MAPPERS: usize = 4;
const REDUCERS: usize = 3;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    async fn run() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("emails.txt");
        std::fs::write(&input, EMAILS).unwrap();

        let mut engine = MapReduce::new(MAPPERS, REDUCERS, dir.path().join("temp")).unwrap();
        engine.set_app(Arc::new(MinimalPrefix::new(1)));
        engine.run(&input, dir.path().join("out")).await.unwrap();
        Fixture { dir }
    }

    async fn read(&self, store: &str, partitions: usize) -> Vec<Vec<Record>> {
        read_store(&self.dir.path().join(store), partitions).await
    }
}

async fn read_store(base: &Path, partitions: usize) -> Vec<Vec<Record>> {
    let store = PartitionedStore::open(base, partitions, StoreMode::Read).await;
    let mut result = Vec::with_capacity(partitions);
    for i in 0..partitions {
        result.push(store.read_all(i).await.unwrap());
    }
    result
}

/// Parses `"a1 d1 g2"` into records `(a,1) (d,1) (g,2)`.
fn records(compact: &str) -> Vec<Record> {
    compact.split_whitespace()
        .map(|token| {
            let (key, value) = token.split_at(1);
            Record::new(key, value)
        })
        .collect()
}

#[tokio::test]
async fn test_mapper_output() {
    let fixture = Fixture::run().await;
    let result = fixture.read("temp/mapper_out", MAPPERS).await;
    assert_eq!(
        result,
        vec![
            records("a1 d1 g1 g1 j1 p1 v1 y1"),
            records("b1 g1 g1 k1 l1 l1 s1"),
            records("a1 a1 a1 e1 i1 l1 v1 w1"),
            records("a1 g1 g1 l1 l1 s1 s1"),
        ]
    );
}

#[tokio::test]
async fn test_combiner_output() {
    let fixture = Fixture::run().await;
    let result = fixture.read("temp/combiner_out", MAPPERS).await;
    assert_eq!(
        result,
        vec![
            records("a1 d1 g2 j1 p1 v1 y1"),
            records("b1 g2 k1 l2 s1"),
            records("a3 e1 i1 l1 v1 w1"),
            records("a1 g2 l2 s2"),
        ]
    );
}

#[tokio::test]
async fn test_shuffler_output() {
    let fixture = Fixture::run().await;
    let result = fixture.read("temp/reducer_in", REDUCERS).await;
    assert_eq!(
        result,
        vec![
            records("a1 a3 a1 b1 d1 e1 g2 g2 g2"),
            records("i1 j1 k1 l2 l1 l2"),
            records("p1 s1 s2 v1 v1 w1 y1"),
        ]
    );
}

#[tokio::test]
async fn test_reducer_output() {
    let fixture = Fixture::run().await;
    let result = fixture.read("out/reducer_out", REDUCERS).await;
    let flagged = vec![Record::new("false", "false")];
    assert_eq!(result, vec![flagged.clone(), flagged.clone(), flagged]);
}

#[tokio::test]
async fn test_mapper_partitions_are_sorted() {
    let fixture = Fixture::run().await;
    for partition in fixture.read("temp/mapper_out", MAPPERS).await {
        assert!(partition.windows(2).all(|w| w[0].key <= w[1].key));
    }
}

#[tokio::test]
async fn test_shuffle_is_a_global_merge() {
    let fixture = Fixture::run().await;
    let mut expected: Vec<Record> = fixture
        .read("temp/combiner_out", MAPPERS)
        .await
        .into_iter()
        .flatten()
        .collect();
    expected.sort_by(|a, b| a.key.cmp(&b.key));

    let merged: Vec<Record> = fixture
        .read("temp/reducer_in", REDUCERS)
        .await
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(merged, expected);
}

fn generated_input(lines: usize) -> String {
    let mut seed: u32 = 17;
    (0..lines)
        .map(|i| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let letter = (b'a' + ((seed >> 16) % 9) as u8) as char;
            if i % 11 == 0 {
                format!("{}{}\r\n", letter.to_ascii_uppercase(), i)
            } else {
                format!("{}{}\n", letter, i)
            }
        })
        .collect()
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    std::fs::write(&input, generated_input(400)).unwrap();

    let mut engine = MapReduce::new(5, 4, dir.path().join("work")).unwrap();
    engine.set_app(Arc::new(MinimalPrefix::new(1)));

    let first = engine.run(&input, dir.path().join("out1")).await.unwrap();
    let second = engine.run(&input, dir.path().join("out2")).await.unwrap();
    assert_eq!(first, second);
    for i in 0..4 {
        let a = std::fs::read(engine.output_path(dir.path().join("out1"), i)).unwrap();
        let b = std::fs::read(engine.output_path(dir.path().join("out2"), i)).unwrap();
        assert_eq!(a, b, "reducer output {} differs", i);
    }
}

#[tokio::test]
async fn test_engine_matches_sequential_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    let mut content = generated_input(257);
    content.push_str("unterminated");
    std::fs::write(&input, content).unwrap();

    for (mappers, reducers) in [(1, 1), (3, 2), (7, 5), (16, 3)] {
        for prefix_len in [1, 2] {
            let app = Arc::new(MinimalPrefix::new(prefix_len));
            let work = dir.path().join(format!("work-{}-{}", mappers, reducers));
            let out = dir.path().join(format!("out-{}-{}", mappers, reducers));

            let mut engine = MapReduce::new(mappers, reducers, &work).unwrap();
            engine.set_app(app.clone());
            let summary = engine.run(&input, &out).await.unwrap();

            let oracle = sequential::run(&Callbacks::from_app(app), &input, mappers, reducers)
                .await
                .unwrap();

            assert_eq!(read_store(&work.join("mapper_out"), mappers).await, oracle.mapped);
            assert_eq!(read_store(&work.join("combiner_out"), mappers).await, oracle.combined);
            assert_eq!(read_store(&work.join("reducer_in"), reducers).await, oracle.shuffled);
            let reduced: Vec<Record> = read_store(&out.join("reducer_out"), reducers)
                .await
                .into_iter()
                .flatten()
                .collect();
            assert_eq!(reduced, oracle.reduced);

            assert_eq!(summary.mapped, 258);
            let sizes: Vec<usize> = oracle.shuffled.iter().map(Vec::len).collect();
            assert_eq!(summary.shuffled, sizes);
        }
    }
}
