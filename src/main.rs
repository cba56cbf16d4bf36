mod errors {
    use std::io;
    use std::path::PathBuf;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum BaconError {
        #[error("Error opening file {}", path.display())]
        FileOpen {
            path: PathBuf,
            #[source]
            source: io::Error,
        },

        #[error("failed to read {source_label}")]
        Read {
            source_label: String,
            #[source]
            source: io::Error,
        },

        #[error("invalid value {value:?} for {key}")]
        Config { key: String, value: String },

        #[error("failed to write graph dump")]
        Dump(#[from] csv::Error),

        #[error(transparent)]
        Io(#[from] io::Error),
    }

    /// Per-query failures. These are reported and the query loop keeps going.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum QueryError {
        #[error("No actor named {} entered", String::from_utf8_lossy(.0))]
        UnknownActor(Vec<u8>),
    }
}

mod settings {
    use crate::errors::BaconError;
    use clap::Parser;
    use std::path::PathBuf;

    pub const DEFAULT_REFERENCE_ACTOR: &str = "Kevin Bacon";
    pub const REFERENCE_ENV_VAR: &str = "BACON_REFERENCE_ACTOR";

    #[derive(Parser, Debug)]
    #[command(name = "bacon_number")]
    #[command(about = "Scores actors by co-starring distance from Kevin Bacon")]
    #[command(version)]
    pub struct Cli {
        /// Print the chain of movies linking each actor to the reference actor
        #[arg(short = 'l', long = "list-path", overrides_with = "list_path")]
        pub list_path: bool,

        /// Measure scores against this actor instead
        #[arg(long, value_name = "NAME")]
        pub reference: Option<String>,

        /// Write every actor/movie membership to a CSV file before querying
        #[arg(long, value_name = "PATH")]
        pub dump_csv: Option<PathBuf>,

        /// Movie file: `Movie: <title>` lines, each followed by its cast
        pub input: PathBuf,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SearchConfig {
        pub reference_actor: String,
        pub print_path: bool,
    }

    impl Default for SearchConfig {
        fn default() -> Self {
            Self {
                reference_actor: DEFAULT_REFERENCE_ACTOR.to_string(),
                print_path: false,
            }
        }
    }

    impl SearchConfig {
        pub fn from_env() -> Result<Self, BaconError> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BaconError> {
            let mut config = Self::default();
            if let Some(name) = lookup(REFERENCE_ENV_VAR) {
                if name.is_empty() {
                    return Err(BaconError::Config {
                        key: REFERENCE_ENV_VAR.to_string(),
                        value: name,
                    });
                }
                config.reference_actor = name;
            }
            Ok(config)
        }

        /// Command-line flags win over the environment.
        pub fn with_cli_override(mut self, cli: &Cli) -> Self {
            if let Some(name) = &cli.reference {
                self.reference_actor = name.clone();
            }
            self.print_path = cli.list_path;
            self
        }
    }
}

mod movie_graph {
    use std::borrow::Cow;
    use std::collections::{HashMap, HashSet};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActorId(usize);

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MovieId(usize);

    impl ActorId {
        pub fn index(self) -> usize {
            self.0
        }
    }

    // Names and titles are kept as the raw bytes of the input line.
    #[derive(Debug)]
    pub struct Actor {
        name: Vec<u8>,
        movies: Vec<MovieId>, // insertion order
    }

    impl Actor {
        pub fn name(&self) -> &[u8] {
            &self.name
        }

        pub fn display_name(&self) -> Cow<'_, str> {
            String::from_utf8_lossy(&self.name)
        }

        pub fn movies(&self) -> &[MovieId] {
            &self.movies
        }
    }

    #[derive(Debug)]
    pub struct Movie {
        title: Vec<u8>,
        cast: Vec<ActorId>, // insertion order
    }

    impl Movie {
        pub fn title(&self) -> &[u8] {
            &self.title
        }

        pub fn display_title(&self) -> Cow<'_, str> {
            String::from_utf8_lossy(&self.title)
        }

        pub fn cast(&self) -> &[ActorId] {
            &self.cast
        }
    }

    /// Actors, movies and the membership relation between them.
    ///
    /// Actors are keyed by their exact name bytes, so matching is
    /// case-sensitive and needs no particular encoding. Movies are never
    /// merged: two movies with the same title are two entities.
    #[derive(Debug, Default)]
    pub struct MovieGraph {
        actors: Vec<Actor>,
        movies: Vec<Movie>,
        actor_index: HashMap<Vec<u8>, ActorId>,
        memberships: HashSet<(ActorId, MovieId)>,
    }

    impl MovieGraph {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn find_or_create_actor(&mut self, name: impl AsRef<[u8]>) -> ActorId {
            let name = name.as_ref();
            if let Some(&id) = self.actor_index.get(name) {
                return id;
            }
            let id = ActorId(self.actors.len());
            self.actors.push(Actor {
                name: name.to_vec(),
                movies: Vec::new(),
            });
            self.actor_index.insert(name.to_vec(), id);
            id
        }

        pub fn create_movie(&mut self, title: impl AsRef<[u8]>) -> MovieId {
            let id = MovieId(self.movies.len());
            self.movies.push(Movie {
                title: title.as_ref().to_vec(),
                cast: Vec::new(),
            });
            id
        }

        /// Adds `actor` to the cast of `movie` and `movie` to the filmography
        /// of `actor`. Returns false if the pair was already linked.
        pub fn link(&mut self, actor: ActorId, movie: MovieId) -> bool {
            if !self.memberships.insert((actor, movie)) {
                return false;
            }
            self.actors[actor.0].movies.push(movie);
            self.movies[movie.0].cast.push(actor);
            true
        }

        pub fn find_actor(&self, name: impl AsRef<[u8]>) -> Option<ActorId> {
            self.actor_index.get(name.as_ref()).copied()
        }

        pub fn is_member(&self, actor: ActorId, movie: MovieId) -> bool {
            self.memberships.contains(&(actor, movie))
        }

        pub fn actor(&self, id: ActorId) -> &Actor {
            &self.actors[id.0]
        }

        pub fn movie(&self, id: MovieId) -> &Movie {
            &self.movies[id.0]
        }

        // Traversal order for both projections is most-recently-linked first.
        // Search and path reconstruction must agree on it.
        pub fn movies_of(&self, actor: ActorId) -> impl Iterator<Item = MovieId> + '_ {
            self.actors[actor.0].movies.iter().rev().copied()
        }

        pub fn cast_of(&self, movie: MovieId) -> impl Iterator<Item = ActorId> + '_ {
            self.movies[movie.0].cast.iter().rev().copied()
        }

        pub fn actors(&self) -> impl Iterator<Item = &Actor> {
            self.actors.iter()
        }

        pub fn movies(&self) -> impl Iterator<Item = &Movie> {
            self.movies.iter()
        }

        pub fn actor_count(&self) -> usize {
            self.actors.len()
        }

        pub fn movie_count(&self) -> usize {
            self.movies.len()
        }

        pub fn link_count(&self) -> usize {
            self.memberships.len()
        }
    }
}

mod movie_parsing {
    use crate::errors::BaconError;
    use crate::movie_graph::MovieGraph;
    use std::fs::File;
    use std::io::{self, BufRead, BufReader};
    use std::path::Path;
    use tracing::{debug, info};

    pub const MOVIE_PREFIX: &[u8] = b"Movie: ";

    /// Reads one line into `buf` without its `\n` or `\r\n` terminator.
    /// Returns false at end of input. Bytes are not required to be UTF-8.
    pub fn read_record<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        if reader.read_until(b'\n', buf)? == 0 {
            return Ok(false);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(true)
    }

    pub fn load_movie_file(path: &Path) -> Result<MovieGraph, BaconError> {
        let file = File::open(path).map_err(|source| BaconError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        parse_movies(BufReader::new(file), &path.display().to_string())
    }

    pub fn parse_movies<R: BufRead>(mut reader: R, source_label: &str) -> Result<MovieGraph, BaconError> {
        let mut graph = MovieGraph::new();
        let mut current_movie = None;
        let mut line = Vec::new();
        let mut line_no = 0;

        loop {
            let more = read_record(&mut reader, &mut line).map_err(|source| BaconError::Read {
                source_label: source_label.to_string(),
                source,
            })?;
            if !more {
                break;
            }
            line_no += 1;
            if line.is_empty() {
                continue;
            }

            if let Some(title) = line.strip_prefix(MOVIE_PREFIX) {
                current_movie = Some(graph.create_movie(title));
                continue;
            }

            let actor = graph.find_or_create_actor(&line);
            match current_movie {
                Some(movie) => {
                    graph.link(actor, movie);
                }
                None => debug!(
                    line = line_no,
                    actor = %String::from_utf8_lossy(&line),
                    "actor listed before any movie"
                ),
            }
        }

        info!(
            source = source_label,
            actors = graph.actor_count(),
            movies = graph.movie_count(),
            links = graph.link_count(),
            "loaded movie graph"
        );
        Ok(graph)
    }
}

mod bacon_search {
    use crate::errors::QueryError;
    use crate::movie_graph::{ActorId, MovieGraph};
    use std::collections::VecDeque;
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SearchOutcome {
        /// The query named the reference actor.
        IsReference,
        Found { actor: ActorId, distance: usize },
        /// Reference actor missing from the graph, or no shared-movie chain.
        NoBacon,
    }

    impl SearchOutcome {
        pub fn distance(&self) -> Option<usize> {
            match self {
                SearchOutcome::IsReference => Some(0),
                SearchOutcome::Found { distance, .. } => Some(*distance),
                SearchOutcome::NoBacon => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Hop {
        pub actor: Vec<u8>,
        pub movie: Vec<u8>,
    }

    /// Breadth-first search from the reference actor.
    ///
    /// Keeps the visited marks and parent links of the last query so the
    /// connecting chain can be rebuilt afterwards. Both are cleared at the
    /// start of every query.
    #[derive(Debug, Default)]
    pub struct BaconSearch {
        visited: Vec<bool>,
        parent: Vec<Option<ActorId>>,
    }

    impl BaconSearch {
        pub fn new() -> Self {
            Self::default()
        }

        fn reset(&mut self, actor_count: usize) {
            self.visited.clear();
            self.visited.resize(actor_count, false);
            self.parent.clear();
            self.parent.resize(actor_count, None);
        }

        pub fn shortest_path(
            &mut self,
            graph: &MovieGraph,
            reference: impl AsRef<[u8]>,
            query: impl AsRef<[u8]>,
        ) -> Result<SearchOutcome, QueryError> {
            let (reference, query) = (reference.as_ref(), query.as_ref());
            self.reset(graph.actor_count());

            // holds even when the reference actor never appears in the file
            if query == reference {
                return Ok(SearchOutcome::IsReference);
            }

            let target = graph
                .find_actor(query)
                .ok_or_else(|| QueryError::UnknownActor(query.to_vec()))?;
            let Some(start) = graph.find_actor(reference) else {
                debug!(reference = %String::from_utf8_lossy(reference), "reference actor not in graph");
                return Ok(SearchOutcome::NoBacon);
            };

            let mut frontier: VecDeque<(ActorId, usize)> = VecDeque::new();
            frontier.push_back((start, 0)); // actor, distance
            self.visited[start.index()] = true;
            let mut expanded = 0;

            while let Some((current, distance)) = frontier.pop_front() {
                if current == target {
                    debug!(actor = %graph.actor(current).display_name(), distance, expanded, "found connection");
                    return Ok(SearchOutcome::Found { actor: current, distance });
                }
                expanded += 1;

                for movie in graph.movies_of(current) {
                    for co_star in graph.cast_of(movie) {
                        if !self.visited[co_star.index()] {
                            self.visited[co_star.index()] = true;
                            self.parent[co_star.index()] = Some(current);
                            frontier.push_back((co_star, distance + 1));
                        }
                    }
                }
            }

            debug!(actor = %graph.actor(target).display_name(), expanded, "no connection to reference actor");
            Ok(SearchOutcome::NoBacon)
        }

        pub fn parent_of(&self, actor: ActorId) -> Option<ActorId> {
            self.parent.get(actor.index()).copied().flatten()
        }

        /// Walks parent links from `found` back to the reference actor,
        /// naming the movie each actor shares with its parent. The reference
        /// actor itself is not included.
        pub fn reconstruct_path(&self, graph: &MovieGraph, found: ActorId) -> Vec<Hop> {
            let mut hops = Vec::new();
            let mut current = found;

            while let Some(parent) = self.parent_of(current) {
                // first shared movie in expansion order is the one the search used
                let Some(movie) = graph
                    .movies_of(parent)
                    .find(|&movie| graph.is_member(current, movie))
                else {
                    break;
                };
                hops.push(Hop {
                    actor: graph.actor(current).name().to_vec(),
                    movie: graph.movie(movie).title().to_vec(),
                });
                current = parent;
            }
            hops
        }
    }
}

mod graph_dump {
    use crate::errors::BaconError;
    use crate::movie_graph::MovieGraph;
    use serde::Serialize;
    use std::borrow::Cow;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    #[derive(Debug, Serialize)]
    struct MembershipRecord<'a> {
        movie: Option<Cow<'a, str>>,
        actor: Cow<'a, str>,
    }

    /// Writes one `movie,actor` row per membership, movies in file order,
    /// then a row with an empty movie for every actor linked to none.
    /// Bytes that are not UTF-8 are written as U+FFFD.
    pub fn write_memberships<W: Write>(graph: &MovieGraph, writer: W) -> Result<usize, BaconError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut rows = 0;

        for movie in graph.movies() {
            for &actor in movie.cast() {
                csv_writer.serialize(MembershipRecord {
                    movie: Some(movie.display_title()),
                    actor: graph.actor(actor).display_name(),
                })?;
                rows += 1;
            }
        }
        for actor in graph.actors().filter(|actor| actor.movies().is_empty()) {
            csv_writer.serialize(MembershipRecord {
                movie: None,
                actor: actor.display_name(),
            })?;
            rows += 1;
        }

        csv_writer.flush()?;
        Ok(rows)
    }

    pub fn dump_to_path(graph: &MovieGraph, path: &Path) -> Result<usize, BaconError> {
        let file = File::create(path)?;
        write_memberships(graph, file)
    }
}

mod reporting {
    use crate::bacon_search::{BaconSearch, SearchOutcome};
    use crate::errors::{BaconError, QueryError};
    use crate::movie_graph::MovieGraph;
    use crate::movie_parsing::read_record;
    use crate::settings::SearchConfig;
    use std::io::{self, BufRead, Write};
    use tracing::debug;

    pub const EXIT_COMMAND: &[u8] = b"exit";

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct QuerySummary {
        pub answered: usize,
        pub unknown: usize,
    }

    impl QuerySummary {
        pub fn all_known(&self) -> bool {
            self.unknown == 0
        }
    }

    // names are echoed byte for byte, whatever their encoding
    pub fn write_outcome<W: Write>(
        out: &mut W,
        graph: &MovieGraph,
        search: &BaconSearch,
        config: &SearchConfig,
        outcome: SearchOutcome,
    ) -> io::Result<()> {
        match outcome {
            SearchOutcome::IsReference => {
                writeln!(out, "Score: 0")?;
                if config.print_path {
                    writeln!(out, "{}", config.reference_actor)?;
                }
            }
            SearchOutcome::Found { actor, distance } => {
                writeln!(out, "Score: {}", distance)?;
                if config.print_path {
                    for hop in search.reconstruct_path(graph, actor) {
                        out.write_all(&hop.actor)?;
                        out.write_all(b"\nwas in ")?;
                        out.write_all(&hop.movie)?;
                        out.write_all(b" with\n")?;
                    }
                    writeln!(out, "{}", config.reference_actor)?;
                }
            }
            SearchOutcome::NoBacon => writeln!(out, "Score: No Bacon!")?,
        }
        Ok(())
    }

    /// Answers one query per input line until EOF or `exit`.
    pub fn run_queries<R: BufRead, W: Write, E: Write>(
        graph: &MovieGraph,
        config: &SearchConfig,
        mut input: R,
        out: &mut W,
        err: &mut E,
    ) -> Result<QuerySummary, BaconError> {
        let mut search = BaconSearch::new();
        let mut summary = QuerySummary::default();
        let mut query = Vec::new();

        while read_record(&mut input, &mut query)? {
            if query == EXIT_COMMAND {
                break;
            }

            match search.shortest_path(graph, &config.reference_actor, &query) {
                Ok(outcome) => {
                    debug!(
                        query = %String::from_utf8_lossy(&query),
                        score = ?outcome.distance(),
                        "answered query"
                    );
                    write_outcome(out, graph, &search, config, outcome)?;
                    summary.answered += 1;
                }
                Err(QueryError::UnknownActor(name)) => {
                    err.write_all(b"No actor named ")?;
                    err.write_all(&name)?;
                    err.write_all(b" entered\n")?;
                    summary.unknown += 1;
                }
            }
            out.flush()?;
        }
        Ok(summary)
    }
}

use anyhow::Context;
use clap::Parser;
use settings::{Cli, SearchConfig};
use std::io;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = SearchConfig::from_env()?.with_cli_override(cli);
    let graph = movie_parsing::load_movie_file(&cli.input)?;

    if let Some(path) = &cli.dump_csv {
        let rows = graph_dump::dump_to_path(&graph, path)
            .with_context(|| format!("writing membership dump to {}", path.display()))?;
        info!(rows, path = %path.display(), "wrote membership dump");
    }

    let summary = reporting::run_queries(
        &graph,
        &config,
        io::stdin().lock(),
        &mut io::stdout().lock(),
        &mut io::stderr(),
    )?;
    info!(answered = summary.answered, unknown = summary.unknown, "query loop finished");

    Ok(if summary.all_known() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // usage errors go to stderr, --help and --version to stdout
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing();

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
