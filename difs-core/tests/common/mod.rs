#![allow(dead_code)]

//! In-memory repo speaking the insert / insert check / get / delete command
//! protocol over a `MemoryNetwork`. Inserted files are pulled from the writer
//! and served back under `<repo>/data/<file>/<segment>`.

use difs_core::security::COMMAND_SIGNATURE_COMPONENTS;
use difs_core::{
    CommandVerb, Data, Interest, KeyChain, Manifest, MemoryFace, MemoryNetwork, Name,
    RepoCommand, RepoCommandResponse, RequestOutcome, Signer, SigningMode, Transport,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

const INGEST_MAX_ATTEMPTS: u32 = 4;

#[derive(Default)]
struct StoredFile {
    segments: BTreeMap<u64, Data>,
    end_block_id: Option<u64>,
}

#[derive(Default)]
struct RepoState {
    files: HashMap<String, StoredFile>,
    processes: HashMap<u64, u64>,
    manifests: HashMap<String, Manifest>,
    next_process_id: u64,
    commands: Vec<String>,
}

#[derive(Clone)]
pub struct MemoryRepo {
    prefix: Name,
    face: MemoryFace,
    keychain: Arc<KeyChain>,
    writer_keys: Option<Arc<KeyChain>>,
    state: Arc<Mutex<RepoState>>,
}

pub fn name(uri: &str) -> Name {
    Name::from_uri(uri).unwrap()
}

impl MemoryRepo {
    pub async fn spawn(network: &MemoryNetwork, prefix: &str) -> Self {
        Self::spawn_with_verifier(network, prefix, None).await
    }

    /// Repo that checks every ingested segment against `writer_keys`.
    pub async fn spawn_with_verifier(
        network: &MemoryNetwork,
        prefix: &str,
        writer_keys: Option<Arc<KeyChain>>,
    ) -> Self {
        let repo = MemoryRepo {
            prefix: name(prefix),
            face: network.face(),
            keychain: Arc::new(KeyChain::generate(format!("{}/KEY", prefix))),
            writer_keys,
            state: Arc::new(Mutex::new(RepoState {
                next_process_id: 1,
                ..RepoState::default()
            })),
        };

        let mut interests = repo.face.register_prefix(repo.prefix.clone()).await.unwrap();
        let server = repo.clone();
        tokio::spawn(async move {
            while let Some(interest) = interests.recv().await {
                server.handle(interest).await;
            }
        });
        repo
    }

    /// Store `content` directly, cut into `block_size` segments.
    pub fn seed(&self, file: &str, content: &[u8], block_size: usize) {
        let blocks: Vec<&[u8]> = content.chunks(block_size).collect();
        let end = blocks.len() as u64 - 1;
        let mut state = self.state.lock().unwrap();
        let stored = state.files.entry(file.to_string()).or_default();
        for (segment, block) in blocks.into_iter().enumerate() {
            let data = Data::new(name(file).append_segment(segment as u64), block.to_vec())
                .with_final_block_id(end);
            stored.segments.insert(segment as u64, data);
        }
        stored.end_block_id = Some(end);
    }

    /// Answer `get` for `file` with this manifest instead of a local one.
    pub fn publish_manifest(&self, file: &str, manifest: Manifest) {
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(file.to_string(), manifest);
    }

    pub fn stored_segments(&self, file: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .files
            .get(file)
            .map(|stored| stored.segments.len())
            .unwrap_or(0)
    }

    pub fn final_segments(&self, file: &str) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(file)
            .map(|stored| {
                stored
                    .segments
                    .iter()
                    .filter(|(_, data)| data.is_final())
                    .map(|(segment, _)| *segment)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Verbs of every command received, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    async fn handle(&self, interest: Interest) {
        let is_data = interest
            .name
            .get(self.prefix.len())
            .map(|component| component.as_bytes() == b"data")
            .unwrap_or(false);

        let reply = if is_data {
            self.serve_segment(&interest.name)
        } else {
            self.handle_command(&interest.name)
        };

        if let Some(mut data) = reply {
            self.keychain
                .sign_data(&mut data, &SigningMode::DigestSha256)
                .unwrap();
            self.face.put_data(data).await.unwrap();
        }
    }

    fn serve_segment(&self, requested: &Name) -> Option<Data> {
        let components = requested.components();
        let file = components
            .get(self.prefix.len() + 1..components.len() - 1)?
            .iter()
            .cloned()
            .fold(Name::new(), |file, component| file.append(component));
        let segment = requested.last()?.to_segment().ok()?;

        let state = self.state.lock().unwrap();
        let stored = state.files.get(&file.to_uri())?.segments.get(&segment)?;
        let mut data = Data::new(requested.clone(), stored.content.clone())
            .with_freshness_period(stored.freshness_period);
        data.final_block_id = stored.final_block_id;
        Some(data)
    }

    fn handle_command(&self, signed: &Name) -> Option<Data> {
        let unsigned = signed.prefix(signed.len().checked_sub(COMMAND_SIGNATURE_COMPONENTS)?);
        let command = RepoCommand::parse(&unsigned, &self.prefix).ok()?;
        let file = command.parameter.name.clone()?;
        self.state
            .lock()
            .unwrap()
            .commands
            .push(command.verb.to_string());

        let content = match command.verb {
            CommandVerb::Insert => {
                let process_id = {
                    let mut state = self.state.lock().unwrap();
                    let process_id = state.next_process_id;
                    state.next_process_id += 1;
                    state.processes.insert(process_id, 0);
                    state.files.insert(file.clone(), StoredFile::default());
                    process_id
                };
                let ingest = self.clone();
                tokio::spawn(async move { ingest.ingest(process_id, name(&file)).await });

                let mut response = RepoCommandResponse::with_status(100);
                response.process_id = Some(process_id);
                serde_json::to_vec(&response).unwrap()
            }
            CommandVerb::InsertCheck => {
                let state = self.state.lock().unwrap();
                let response = match command
                    .parameter
                    .process_id
                    .and_then(|process_id| state.processes.get(&process_id).map(|n| (process_id, *n)))
                {
                    Some((process_id, inserted)) => {
                        let done = state
                            .files
                            .get(&file)
                            .and_then(|stored| stored.end_block_id)
                            .map(|end| inserted == end + 1)
                            .unwrap_or(false);
                        let mut response = RepoCommandResponse::with_status(if done { 200 } else { 300 });
                        response.process_id = Some(process_id);
                        response.insert_num = Some(inserted);
                        response
                    }
                    None => RepoCommandResponse::with_status(404),
                };
                serde_json::to_vec(&response).unwrap()
            }
            CommandVerb::Get => {
                let state = self.state.lock().unwrap();
                if let Some(manifest) = state.manifests.get(&file) {
                    manifest.to_json().unwrap().into_bytes()
                } else {
                    match state.files.get(&file) {
                        Some(StoredFile {
                            segments,
                            end_block_id: Some(end),
                        }) if segments.len() as u64 == end + 1 => {
                            let end = *end;
                            Manifest::info(file.clone(), end)
                                .with_repo(self.prefix.to_uri(), 0, end + 1)
                                .to_json()
                                .unwrap()
                                .into_bytes()
                        }
                        _ => Vec::new(),
                    }
                }
            }
            CommandVerb::Delete => {
                let mut state = self.state.lock().unwrap();
                state.manifests.remove(&file);
                let status = if state.files.remove(&file).is_some() { 200 } else { 404 };
                serde_json::to_vec(&RepoCommandResponse::with_status(status)).unwrap()
            }
        };

        Some(Data::new(signed.clone(), content))
    }

    async fn ingest(&self, process_id: u64, file: Name) {
        let Some(manifest_data) = self.fetch(Interest::new(file.clone())).await else {
            return;
        };
        let manifest: Manifest = serde_json::from_slice(&manifest_data.content).unwrap();

        for segment in 0..=manifest.end_block_id {
            let Some(data) = self.fetch(Interest::new(file.clone().append_segment(segment))).await else {
                return;
            };
            if let Some(writer_keys) = &self.writer_keys {
                writer_keys.verify_data(&data).unwrap();
            }

            let mut state = self.state.lock().unwrap();
            let stored = state.files.entry(file.to_uri()).or_default();
            stored.segments.insert(segment, data);
            stored.end_block_id = Some(manifest.end_block_id);
            if let Some(inserted) = state.processes.get_mut(&process_id) {
                *inserted += 1;
            }
        }
    }

    async fn fetch(&self, interest: Interest) -> Option<Data> {
        for _ in 0..INGEST_MAX_ATTEMPTS {
            if let RequestOutcome::Data(data) = self.face.express_interest(interest.clone()).await {
                return Some(data);
            }
        }
        None
    }
}
