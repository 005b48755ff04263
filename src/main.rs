use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use course_tutor::{
    MIGRATOR, TutorConfig,
    course::{catalog::CourseCatalog, tree::CourseTree},
    progress::{AdvanceOutcome, ProgressTracker},
    student::{StudentProfile, create_student, delete_student, get_student_list},
    tutor::{
        TurnRequest, TutorSessionManager,
        backend::openai::OpenAiBackend,
        thread::{ChatType, ThreadStore},
    },
    utils::{init_log, now_local},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Course platform tutoring core", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Path to the sqlite database file
    #[arg(short, long, default_value = "database/courses.db")]
    database: PathBuf,
    /// Optional tutor configuration file (toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    Course {
        #[command(subcommand)]
        command: CourseCommand,
    },
    Student {
        #[command(subcommand)]
        command: StudentCommand,
    },
    /// Enroll a student into a course, unlocking its first lesson
    Enroll {
        student_id: String,
        course_id: String,
    },
    /// Advance a student manually with an unlock code
    Advance {
        student_id: String,
        course_id: String,
        lesson_id: String,
        unlock_code: String,
    },
    /// Interactive tutoring chat on stdin/stdout
    Chat {
        student_id: String,
        course_id: String,
        /// Lesson for recitation mode; omit for course Q&A
        #[arg(short, long)]
        lesson_id: Option<String>,
    },
    Thread {
        #[command(subcommand)]
        command: ThreadCommand,
    },
}

#[derive(Debug, clap::Subcommand)]
enum CourseCommand {
    List,
    /// Import a course tree from a toml file, replacing existing content
    Import { file: PathBuf },
}

#[derive(Debug, clap::Subcommand)]
enum StudentCommand {
    List,
    Create {
        id: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        experience_level: String,
        #[arg(long, default_value = "")]
        industry: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ThreadCommand {
    /// Delete tutoring thread mappings older than the given number of days
    Prune {
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[tokio::main]
async fn main() {
    let _guard = init_log(None);
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(&args.database)
        .create_if_missing(true)
        .foreign_keys(true);
    let database = SqlitePoolOptions::new().connect_with(options).await?;
    MIGRATOR.run(&database).await?;

    let config = match &args.config {
        Some(path) => TutorConfig::load(path)?,
        None => TutorConfig::default(),
    };
    let catalog = CourseCatalog::new(database.clone());
    let tracker = ProgressTracker::new(catalog.clone(), database.clone());

    match args.command {
        Commands::Course { command } => match command {
            CourseCommand::List => {
                for (id, title) in catalog.list_courses().await? {
                    println!("{:<24} {}", id, title);
                }
            }
            CourseCommand::Import { file } => {
                let content = std::fs::read_to_string(&file)?;
                let tree: CourseTree = toml::from_str(&content)?;
                let lesson_count = tree.flattened_lessons().len();
                catalog.import_course(&tree).await?;
                println!(
                    "Imported course {} with {} modules, {} lessons",
                    tree.id,
                    tree.modules.len(),
                    lesson_count
                );
            }
        },
        Commands::Student { command } => match command {
            StudentCommand::List => {
                for s in get_student_list(&database).await? {
                    println!("{:<24} {} {}", s.id, s.first_name, s.last_name);
                }
            }
            StudentCommand::Create {
                id,
                first_name,
                last_name,
                experience_level,
                industry,
            } => {
                create_student(
                    &database,
                    &StudentProfile {
                        id: id.clone(),
                        first_name,
                        last_name,
                        experience_level,
                        industry,
                    },
                )
                .await?;
                println!("Student created: {}", id);
            }
            StudentCommand::Delete { id } => {
                delete_student(&database, &id).await?;
                println!("Student deleted: {}", id);
            }
        },
        Commands::Enroll {
            student_id,
            course_id,
        } => {
            let enrollment = tracker.enroll(&student_id, &course_id).await?;
            println!(
                "Enrolled {} in {}, current lesson: {}",
                student_id, course_id, enrollment.current_lesson_id
            );
        }
        Commands::Advance {
            student_id,
            course_id,
            lesson_id,
            unlock_code,
        } => match tracker
            .advance(&student_id, &course_id, &lesson_id, &unlock_code)
            .await
        {
            Ok(receipt) => match receipt.outcome {
                AdvanceOutcome::Unlocked { next_lesson_id } => {
                    println!("Lesson unlocked! Next lesson: {}", next_lesson_id);
                }
                AdvanceOutcome::CourseCompleted => {
                    println!("Congratulations! Course {} is complete.", course_id);
                }
            },
            Err(e) => println!("{}", e.user_message()),
        },
        Commands::Chat {
            student_id,
            course_id,
            lesson_id,
        } => {
            let backend = Arc::new(OpenAiBackend::from_env()?);
            let manager =
                TutorSessionManager::new(catalog, tracker, backend, config, database.clone());
            let chat_type = match lesson_id {
                Some(_) => ChatType::LessonRecitation,
                None => ChatType::CourseQa,
            };
            if let Some(lesson_id) = &lesson_id {
                if let Some(welcome) = manager
                    .lesson_welcome(&student_id, &course_id, lesson_id)
                    .await?
                {
                    println!("{welcome}");
                }
            }
            chat_loop(&manager, student_id, course_id, lesson_id, chat_type).await?;
        }
        Commands::Thread { command } => match command {
            ThreadCommand::Prune { days } => {
                let store = ThreadStore::new(database.clone());
                let cutoff = now_local() - time::Duration::days(days);
                let pruned = store.prune_older_than(cutoff).await?;
                println!("Pruned {} thread mappings older than {} days", pruned, days);
            }
        },
    }
    Ok(())
}

async fn chat_loop(
    manager: &TutorSessionManager,
    student_id: String,
    course_id: String,
    lesson_id: Option<String>,
    chat_type: ChatType,
) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    loop {
        println!("\n[You]:");
        let mut input = String::new();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let input = input.trim();
        if input == "exit" {
            break;
        }
        let result = manager
            .run_turn(TurnRequest {
                student_id: student_id.clone(),
                course_id: course_id.clone(),
                lesson_id: lesson_id.clone(),
                chat_type,
                message: input.to_string(),
            })
            .await;
        match result {
            Ok(turn) => {
                println!("\n[Tutor]:\n{}", turn.response_text);
                if let Some(outcome) = turn.advance {
                    match outcome {
                        AdvanceOutcome::Unlocked { next_lesson_id } => {
                            println!("\n*** Lesson complete! Unlocked: {} ***", next_lesson_id);
                        }
                        AdvanceOutcome::CourseCompleted => {
                            println!("\n*** Course complete! ***");
                        }
                    }
                }
            }
            Err(e) => println!("\n[Error]: {}", e.user_message()),
        }
    }
    Ok(())
}
