//! Subjects and bodies of every message the workflow sends.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::models::{GroupTask, IndividualTask, Link, Trainee};
use crate::notifier::Email;
use crate::tally::{Decision, Tally};
use crate::validation::format_references;

pub const TRAINEE_APPLIED_TEMPLATE: &str = "traineeApplied";
pub const VOTES_CALCULATED_TEMPLATE: &str = "votesCalculated";

fn deadline(from_millis: i64, hours: u32) -> String {
    let deadline = from_millis + i64::from(hours) * 3_600_000;
    Utc.timestamp_millis_opt(deadline)
        .single()
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| format!("{hours} hours from now"))
}

fn links(list: &[Link]) -> String {
    if list.is_empty() {
        "(none)".to_string()
    } else {
        format_references(list)
    }
}

pub fn decision(trainee: &Trainee, tally: &Tally) -> Email {
    let (subject, english, arabic) = match tally.decision {
        Decision::Accept => (
            "Your application was initially accepted / تم قبول طلبك مبدئياً",
            "Congratulations! Your application has been initially accepted. We will contact you soon with the next steps.",
            "تهانينا! تم قبول طلبك مبدئياً، وسنتواصل معك قريباً بالخطوات التالية.",
        ),
        Decision::Reject => (
            "About your application / بخصوص طلبك",
            "Thank you for applying. Unfortunately we cannot move forward with your application this year.",
            "شكراً لتقديمك. للأسف لا يمكننا المضي قدماً في طلبك هذا العام.",
        ),
    };
    let body = format!(
        "Hi {name},\n\n{english}\n\n---\n\nمرحباً {name}،\n\n{arabic}\n",
        name = trainee.fullname,
    );
    Email::new(&trainee.email, subject, body)
}

pub fn kicked_out(trainee: &Trainee) -> Email {
    Email::new(
        &trainee.email,
        "You have been removed from the program",
        format!(
            "Hi {},\n\nYou let too many tasks expire without delivering them, so you have been removed from the {} program.\n",
            trainee.fullname, trainee.program
        ),
    )
}

pub fn applicant_summary(trainee: &Trainee, app_url: &str) -> Value {
    json!({
        "id": trainee.id,
        "fullname": trainee.fullname,
        "university": trainee.university,
        "major": trainee.major,
        "youtubeVideoUrl": trainee.youtube_video_url,
        "voteUrl": format!("{}/trainees/{}", app_url, trainee.id),
    })
}

pub fn decision_summary(trainee: &Trainee) -> Value {
    json!({
        "id": trainee.id,
        "fullname": trainee.fullname,
        "currentStatus": trainee.current_status,
    })
}

pub fn task_sent(task: &IndividualTask, sent_at: i64) -> Email {
    Email::new(
        &task.assigned_to.email,
        format!("New task: {}", task.title),
        format!(
            "Hi {},\n\n{}\n\nReferences:\n{}\n\nChannel: {}\nDeliver before: {}\n",
            task.assigned_to.fullname,
            task.description,
            links(&task.references),
            task.channel,
            deadline(sent_at, task.expires_after),
        ),
    )
}

pub fn task_expired(task: &IndividualTask) -> Email {
    Email::new(
        &task.assigned_to.email,
        format!("Task expired: {}", task.title),
        format!(
            "Hi {},\n\nThe delivery window for \"{}\" has passed. Ask a mentor for an extension if you still want to deliver it.\n",
            task.assigned_to.fullname, task.title
        ),
    )
}

pub fn task_extended(task: &IndividualTask, extended_at: i64) -> Email {
    Email::new(
        &task.assigned_to.email,
        format!("Task extended: {}", task.title),
        format!(
            "Hi {},\n\n\"{}\" has been extended. Deliver before: {}\n",
            task.assigned_to.fullname,
            task.title,
            deadline(extended_at, task.expires_after),
        ),
    )
}

pub fn task_delivered(task: &IndividualTask, mentor_email: &str, app_url: &str) -> Email {
    Email::new(
        mentor_email,
        format!("{} delivered: {}", task.assigned_to.fullname, task.title),
        format!(
            "{} delivered \"{}\".\n\nAnswers:\n{}\n\nReview: {}/tasks/{}\n",
            task.assigned_to.fullname,
            task.title,
            links(&task.answers),
            app_url,
            task.id,
        ),
    )
}

pub fn task_corrected(task: &IndividualTask, accepted: bool) -> Email {
    let verdict = if accepted { "accepted" } else { "rejected" };
    Email::new(
        &task.assigned_to.email,
        format!("Your delivery was {}: {}", verdict, task.title),
        format!(
            "Hi {},\n\nYour delivery of \"{}\" was {}.\n",
            task.assigned_to.fullname, task.title, verdict
        ),
    )
}

fn group_email(task: &GroupTask, to: &str, subject: String, body: String) -> Email {
    Email::new(to, subject, format!("Group {}:\n\n{}", task.group.name, body))
}

pub fn group_task_sent(task: &GroupTask, to: &str, sent_at: i64) -> Email {
    group_email(
        task,
        to,
        format!("New group task: {}", task.title),
        format!(
            "{}\n\nReferences:\n{}\n\nPublic channel: {}\nPrivate channel: {}\nDeliver before: {}\n",
            task.description,
            links(&task.references),
            task.public_channel,
            task.private_channel,
            deadline(sent_at, task.expires_after),
        ),
    )
}

pub fn group_task_expired(task: &GroupTask, to: &str) -> Email {
    group_email(
        task,
        to,
        format!("Group task expired: {}", task.title),
        format!("The delivery window for \"{}\" has passed.\n", task.title),
    )
}

pub fn group_task_extended(task: &GroupTask, to: &str, extended_at: i64) -> Email {
    group_email(
        task,
        to,
        format!("Group task extended: {}", task.title),
        format!(
            "\"{}\" has been extended. Deliver before: {}\n",
            task.title,
            deadline(extended_at, task.expires_after)
        ),
    )
}

pub fn group_task_delivered(task: &GroupTask, mentor_email: &str, app_url: &str) -> Email {
    Email::new(
        mentor_email,
        format!("{} delivered: {}", task.group.name, task.title),
        format!(
            "{} delivered \"{}\".\n\nAnswers:\n{}\n\nReview: {}/group-tasks/{}\n",
            task.group.name,
            task.title,
            links(&task.answers),
            app_url,
            task.id,
        ),
    )
}

pub fn group_task_corrected(task: &GroupTask, to: &str, accepted: bool) -> Email {
    let verdict = if accepted { "accepted" } else { "rejected" };
    group_email(
        task,
        to,
        format!("Your group delivery was {}: {}", verdict, task.title),
        format!("The delivery of \"{}\" was {}.\n", task.title, verdict),
    )
}

pub fn contact_message(name: &str, email: &str, subject: &str, message: &str, to: &str) -> Email {
    Email::new(to, subject, format!("{name} <{email}>\n\n{message}")).reply_to(email)
}
