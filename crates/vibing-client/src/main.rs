//! # vibing
//!
//! Terminal front-end for VIBING direct messages.
//!
//! With `VIBING_URL` set it talks to the hosted backend (REST, auth and the
//! realtime websocket); without it everything runs against the embedded
//! SQLite backend in the data directory.
//!
//! Lines typed on stdin are sent to the open conversation.  Commands:
//! `/open <user>`, `/msg <user> <nickname>`, `/back`, `/hide <user>`,
//! `/reload`, `/tab <name>`, `/quit`.
//!
//! Board commands work on any tab: `/like <post>`, `/dislike <post>`,
//! `/save <post>`, `/follow <user>`, `/comments <post>`,
//! `/comment <post> <text>`, `/reply <post> <comment> <text>`,
//! `/uncomment <comment>`, `/tags <post> [tags]`, `/nick <name>`,
//! `/avatar <file>` and `/rank <latest|popular|trending> <post>...`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use vibing_client::app::App;
use vibing_client::config::{ClientConfig, Credentials};
use vibing_client::navigation::{BackOutcome, Tab};
use vibing_client::session::{Confirmer, SessionDeps, StaticConfirmer};
use vibing_client::{CommunityService, MessageEvent};
use vibing_net::{
    sign_in_with_password, AuthSession, AvatarStorage, Endpoint, RealtimeClient, RestBackend,
    SignedOut,
};
use vibing_shared::backend::{AuthProvider, ProfileDirectory};
use vibing_shared::community::{CommentNode, LikeSummary};
use vibing_shared::constants::UNKNOWN_NICKNAME;
use vibing_shared::nickname;
use vibing_shared::ranking::SortMode;
use vibing_shared::upload::content_type_for;
use vibing_shared::{CommentId, NicknameError, PostId, UserId};
use vibing_store::{Database, LocalBackend, Preferences};

/// Everything the command loop talks to.
struct Backends {
    session: SessionDeps,
    community: CommunityService,
    /// Present only when signed in to the hosted backend.
    avatars: Option<Avatars>,
}

struct Avatars {
    storage: AvatarStorage,
    user: UserId,
    profiles: Arc<dyn ProfileDirectory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    vibing_client::init_tracing();
    info!("Starting VIBING messages v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Backend and preferences
    // -----------------------------------------------------------------------
    let backends = build_backends(&config).await?;
    let prefs = match &config.data_dir {
        Some(dir) => Preferences::open_in_dir(dir)?,
        None => Preferences::new(Database::new()?),
    };

    let avatars = backends.avatars;
    let mut app = App::new(
        backends.session,
        backends.community,
        prefs,
        config.timings(),
    );
    let mut events = app.take_events().context("event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = render(&event) {
                println!("{line}");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 3. Command loop
    // -----------------------------------------------------------------------
    if let Err(e) = app.switch_tab(Tab::Messages, 0).await {
        warn!(error = %e, "Messages unavailable");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Quit => break,
            Input::Empty => {}
            Input::Invalid(reason) => println!("! {reason}"),
            Input::Tab(tab) => {
                if let Err(e) = app.switch_tab(tab, 0).await {
                    println!("! {e}");
                }
            }
            Input::Board(command) => match run_board(&app, avatars.as_ref(), command).await {
                Ok(line) => println!("{line}"),
                Err(e) => println!("! {e:#}"),
            },
            Input::MessageUser { user, nickname } => {
                if let Err(e) = app.message_user(user, &nickname).await {
                    println!("! {e}");
                }
            }
            Input::Back => {
                if app.active_tab() == Tab::Messages {
                    if let Some(handle) = app.messages() {
                        handle.back().await?;
                        continue;
                    }
                }
                if app.back().await == BackOutcome::ExitSite {
                    break;
                }
            }
            other => {
                let Some(handle) = app.messages() else {
                    println!("! open the messages tab first (/tab messages)");
                    continue;
                };
                match other {
                    Input::Open(user) => handle.open(user).await?,
                    Input::Hide(user) => handle.hide(user).await?,
                    Input::Reload => handle.reload().await?,
                    Input::Send(text) => handle.send_message(&text).await?,
                    _ => {}
                }
            }
        }
    }

    app.shutdown().await;
    drop(app);
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer failed");
    }
    info!("Bye");
    Ok(())
}

async fn build_backends(config: &ClientConfig) -> anyhow::Result<Backends> {
    // `/hide` is itself the explicit confirmation.
    let confirmer: Arc<dyn Confirmer> = Arc::new(StaticConfirmer(true));

    let Some(url) = &config.backend_url else {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in_dir(dir)?,
            None => Database::new()?,
        };
        let backend = LocalBackend::new(db);
        let user = match config.credentials {
            Credentials::LocalUser(id) => id,
            _ => {
                let id = UserId::new();
                info!(user = %id, "No VIBING_USER_ID, using a fresh local user");
                id
            }
        };
        backend.sign_in(Some(user));
        return Ok(Backends {
            community: CommunityService::from_backend(Arc::new(backend.clone())),
            session: SessionDeps::from_backend(backend, confirmer),
            avatars: None,
        });
    };

    let endpoint = Endpoint::new(url, &config.anon_key)?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("vibing/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let session = match &config.credentials {
        Credentials::Token {
            user_id,
            access_token,
        } => Some(AuthSession::from_token(*user_id, access_token.clone())),
        Credentials::Password { email, password } => Some(
            sign_in_with_password(&http, &endpoint, email, password)
                .await
                .context("sign-in failed")?,
        ),
        Credentials::LocalUser(_) | Credentials::Anonymous => {
            warn!("No credentials for the hosted backend, continuing signed out");
            None
        }
    };

    let rest = Arc::new(RestBackend::new(http.clone(), endpoint.clone(), session.as_ref()));
    let realtime = Arc::new(RealtimeClient::new(endpoint.clone(), session.as_ref()));
    let avatars = session.as_ref().map(|s| Avatars {
        storage: AvatarStorage::new(http, endpoint, s),
        user: s.user_id,
        profiles: rest.clone(),
    });
    let auth: Arc<dyn AuthProvider> = match session {
        Some(session) => Arc::new(session),
        None => Arc::new(SignedOut),
    };

    Ok(Backends {
        community: CommunityService::new(auth.clone(), rest.clone(), rest.clone()),
        session: SessionDeps {
            auth,
            messages: rest.clone(),
            profiles: rest,
            realtime,
            confirmer,
        },
        avatars,
    })
}

async fn run_board(
    app: &App,
    avatars: Option<&Avatars>,
    command: BoardCommand,
) -> anyhow::Result<String> {
    let community = app.community();
    let line = match command {
        BoardCommand::Like(post) => likes_line(post, community.toggle_like(post).await?),
        BoardCommand::Dislike(post) => likes_line(post, community.toggle_dislike(post).await?),
        BoardCommand::Save(post) => {
            let saved = community.toggle_save(post).await?;
            format!("-- {} #{post}", if saved { "saved" } else { "unsaved" })
        }
        BoardCommand::Follow(user) => {
            let following = community.toggle_follow(user).await?;
            let stats = community.follow_stats(user).await?;
            format!(
                "-- {} {user} ({} followers)",
                if following { "following" } else { "unfollowed" },
                stats.followers
            )
        }
        BoardCommand::Comments(post) => {
            let tree = community.comments(post).await?;
            let total: usize = tree.iter().map(CommentNode::thread_len).sum();
            let mut out = format!("-- {total} comment(s) on #{post}");
            render_comments(&tree, 0, &mut out);
            out
        }
        BoardCommand::Comment { post, parent, text } => {
            let stored = community.add_comment(post, &text, parent).await?;
            format!("-- comment #{} posted", stored.id)
        }
        BoardCommand::Uncomment(id) => {
            community.delete_comment(id).await?;
            format!("-- comment #{id} deleted")
        }
        BoardCommand::Tags { post, set } => {
            let tags = match set {
                Some(input) => community.set_tags(post, &input).await?,
                None => community.tags(post).await?,
            };
            format!("-- #{post} tags: {}", tags.join(", "))
        }
        BoardCommand::Nick(name) => match community.check_nickname(&name).await {
            Ok(name) => format!("-- {name} is available"),
            Err(NicknameError::Taken) => {
                let ideas = nickname::suggestions(&name, &mut rand::thread_rng());
                format!("! {name} is taken, try {}", ideas.join(", "))
            }
            Err(e) => format!("! {e}"),
        },
        BoardCommand::Avatar(path) => {
            let avatars = avatars.context("avatar uploads need a hosted sign-in")?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("avatar.png");
            let content_type = content_type_for(file_name).unwrap_or("application/octet-stream");
            let previous = avatars
                .profiles
                .profile(avatars.user)
                .await?
                .and_then(|p| p.avatar_url);
            let url = avatars
                .storage
                .replace_avatar(
                    avatars.user,
                    file_name,
                    content_type,
                    bytes,
                    previous.as_deref(),
                    Utc::now().timestamp_millis(),
                )
                .await?;
            format!("-- avatar uploaded: {url}")
        }
        BoardCommand::Rank { mode, posts } => community
            .rank(&posts, mode, Utc::now())
            .await?
            .iter()
            .map(|p| format!("#{} +{} -{}", p.id, p.likes_count, p.dislikes_count))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(line)
}

fn likes_line(post: PostId, summary: LikeSummary) -> String {
    let mine = summary.mine.map(|r| r.as_str()).unwrap_or("none");
    format!(
        "-- #{post}: {} likes, {} dislikes (yours: {mine})",
        summary.likes, summary.dislikes
    )
}

fn render_comments(nodes: &[CommentNode], depth: usize, out: &mut String) {
    for node in nodes {
        let c = &node.comment;
        out.push_str(&format!(
            "\n{}#{} {}: {}",
            "  ".repeat(depth),
            c.id,
            c.author_nickname.as_deref().unwrap_or(UNKNOWN_NICKNAME),
            c.content
        ));
        render_comments(&node.replies, depth + 1, out);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BoardCommand {
    Like(PostId),
    Dislike(PostId),
    Save(PostId),
    Follow(UserId),
    Comments(PostId),
    Comment {
        post: PostId,
        parent: Option<CommentId>,
        text: String,
    },
    Uncomment(CommentId),
    Tags {
        post: PostId,
        set: Option<String>,
    },
    Nick(String),
    Avatar(PathBuf),
    Rank {
        mode: SortMode,
        posts: Vec<PostId>,
    },
}

impl BoardCommand {
    fn parse(name: &str, rest: &str) -> Option<Result<Self, String>> {
        let post = |raw: &str| raw.parse::<PostId>().map_err(|e| e.to_string());
        let comment = |raw: &str| raw.parse::<CommentId>().map_err(|e| e.to_string());
        let (head, tail) = rest
            .split_once(char::is_whitespace)
            .map(|(h, t)| (h, t.trim()))
            .unwrap_or((rest, ""));

        let parsed = match name {
            "like" => post(rest).map(BoardCommand::Like),
            "dislike" => post(rest).map(BoardCommand::Dislike),
            "save" => post(rest).map(BoardCommand::Save),
            "follow" => rest
                .parse::<UserId>()
                .map(BoardCommand::Follow)
                .map_err(|_| format!("not a user id: {rest:?}")),
            "comments" => post(rest).map(BoardCommand::Comments),
            "comment" => post(head).map(|post| BoardCommand::Comment {
                post,
                parent: None,
                text: tail.to_string(),
            }),
            "reply" => {
                let (parent, text) = tail
                    .split_once(char::is_whitespace)
                    .map(|(p, t)| (p, t.trim()))
                    .unwrap_or((tail, ""));
                post(head).and_then(|post| {
                    comment(parent).map(|parent| BoardCommand::Comment {
                        post,
                        parent: Some(parent),
                        text: text.to_string(),
                    })
                })
            }
            "uncomment" => comment(rest).map(BoardCommand::Uncomment),
            "tags" => post(head).map(|post| BoardCommand::Tags {
                post,
                set: (!tail.is_empty()).then(|| tail.to_string()),
            }),
            "nick" if rest.is_empty() => Err("usage: /nick <name>".to_string()),
            "nick" => Ok(BoardCommand::Nick(rest.to_string())),
            "avatar" if rest.is_empty() => Err("usage: /avatar <file>".to_string()),
            "avatar" => Ok(BoardCommand::Avatar(PathBuf::from(rest))),
            "rank" => {
                let mut words = rest.split_whitespace();
                let mode = words.next().unwrap_or_default();
                let mode = mode.parse::<SortMode>().unwrap_or_default();
                words
                    .map(post)
                    .collect::<Result<Vec<_>, _>>()
                    .map(|posts| BoardCommand::Rank { mode, posts })
            }
            _ => return None,
        };
        Some(parsed)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Quit,
    Back,
    Reload,
    Tab(Tab),
    Open(UserId),
    Hide(UserId),
    MessageUser { user: UserId, nickname: String },
    Board(BoardCommand),
    Send(String),
    Invalid(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Send(line.to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(n, r)| (n, r.trim()))
            .unwrap_or((command, ""));
        let user = |raw: &str| {
            raw.parse::<UserId>()
                .map_err(|_| format!("not a user id: {raw:?}"))
        };

        let parsed = match name {
            "quit" | "q" => Ok(Input::Quit),
            "back" => Ok(Input::Back),
            "reload" => Ok(Input::Reload),
            "tab" => rest.parse().map(Input::Tab).map_err(|e| e.to_string()),
            "open" => user(rest).map(Input::Open),
            "hide" => user(rest).map(Input::Hide),
            "msg" => {
                let (id, nickname) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                user(id).map(|user| Input::MessageUser {
                    user,
                    nickname: nickname.trim().to_string(),
                })
            }
            other => match BoardCommand::parse(other, rest) {
                Some(board) => board.map(Input::Board),
                None => Err(format!("unknown command /{other}")),
            },
        };
        parsed.unwrap_or_else(Input::Invalid)
    }
}

fn render(event: &MessageEvent) -> Option<String> {
    let line = match event {
        MessageEvent::LoginRequired => "! login required".to_string(),
        MessageEvent::Alert { message } => format!("! {message}"),
        MessageEvent::ConversationsUpdated {
            conversations,
            active,
        } => {
            let mut out = format!("-- {} conversation(s)", conversations.len());
            for c in conversations {
                let marker = if Some(c.peer.user_id) == *active { '>' } else { ' ' };
                let unread = if c.has_unread { '*' } else { ' ' };
                out.push_str(&format!(
                    "\n{marker}{unread} {} ({}): {}",
                    c.peer.nickname, c.peer.user_id, c.last_message.content
                ));
            }
            out
        }
        MessageEvent::UnreadCountChanged { badge, .. } => {
            format!("-- unread: {}", badge.as_deref().unwrap_or("0"))
        }
        MessageEvent::ConversationOpened { peer } => format!("== chat with {}", peer.nickname),
        MessageEvent::ConversationClosed => "== back to conversations".to_string(),
        MessageEvent::TranscriptLoaded { entries, .. } => entries
            .iter()
            .map(|e| format!("{} {}", if e.mine { "me>" } else { "  <" }, e.content))
            .collect::<Vec<_>>()
            .join("\n"),
        MessageEvent::TranscriptAppended { entry } => {
            format!("{} {}", if entry.mine { "me>" } else { "  <" }, entry.content)
        }
        MessageEvent::TranscriptFailed { message } => format!("! {message}"),
        MessageEvent::ComposerRestored { draft } => format!("! not sent: {draft}"),
        MessageEvent::DeliveryModeChanged { mode } => format!("-- delivery: {mode:?}"),
        MessageEvent::ComposerCleared | MessageEvent::SendingChanged { .. } => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_plain_text() {
        let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let user: UserId = id.parse().unwrap();

        assert_eq!(Input::parse("  "), Input::Empty);
        assert_eq!(Input::parse("hello /there"), Input::Send("hello /there".into()));
        assert_eq!(Input::parse("/q"), Input::Quit);
        assert_eq!(Input::parse(&format!("/open {id}")), Input::Open(user));
        assert_eq!(
            Input::parse(&format!("/msg {id}  Neo Vibes")),
            Input::MessageUser {
                user,
                nickname: "Neo Vibes".into()
            }
        );
        assert_eq!(Input::parse("/tab feed"), Input::Tab(Tab::Feed));
        assert!(matches!(Input::parse("/hide nobody"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/dance"), Input::Invalid(_)));
    }

    #[test]
    fn parses_board_commands() {
        let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let user: UserId = id.parse().unwrap();

        assert_eq!(Input::parse("/like 12"), Input::Board(BoardCommand::Like(PostId(12))));
        assert_eq!(Input::parse(&format!("/follow {id}")), Input::Board(BoardCommand::Follow(user)));
        assert_eq!(
            Input::parse("/reply 3 9  thanks a lot"),
            Input::Board(BoardCommand::Comment {
                post: PostId(3),
                parent: Some(CommentId(9)),
                text: "thanks a lot".into()
            })
        );
        assert_eq!(
            Input::parse("/tags 4"),
            Input::Board(BoardCommand::Tags { post: PostId(4), set: None })
        );
        assert_eq!(
            Input::parse("/tags 4 #sky, sea"),
            Input::Board(BoardCommand::Tags { post: PostId(4), set: Some("#sky, sea".into()) })
        );
        assert_eq!(
            Input::parse("/rank popular 1 2"),
            Input::Board(BoardCommand::Rank {
                mode: SortMode::Popular,
                posts: vec![PostId(1), PostId(2)]
            })
        );
        assert!(matches!(Input::parse("/like zero"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/rank latest 1 x"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/nick"), Input::Invalid(_)));
    }

    #[test]
    fn comment_threads_render_indented() {
        use vibing_shared::community::{comment_tree, Comment};
        let at = Utc::now();
        let comment = |id: i64, parent: Option<i64>, nick: Option<&str>| Comment {
            id: CommentId(id),
            post_id: PostId(1),
            user_id: UserId::new(),
            content: format!("c{id}"),
            author_nickname: nick.map(str::to_string),
            parent_id: parent.map(CommentId),
            created_at: at,
        };
        let tree = comment_tree(vec![comment(1, None, Some("ann")), comment(2, Some(1), None)]);
        let mut out = String::new();
        render_comments(&tree, 0, &mut out);
        assert_eq!(out, "\n#1 ann: c1\n  #2 Unknown: c2");
    }

    #[test]
    fn typing_noise_is_not_rendered() {
        assert_eq!(render(&MessageEvent::ComposerCleared), None);
        assert_eq!(
            render(&MessageEvent::Alert {
                message: "nope".into()
            })
            .as_deref(),
            Some("! nope")
        );
    }
}
