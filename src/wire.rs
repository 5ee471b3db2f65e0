use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};

use crate::limits::MAX_LINE_LEN;
use crate::observability;
use crate::protocol::{Request, Response};
use crate::service::{MemoPatch, NewMemo, NewReservation, Scheduler};

pub type WireResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// One connection: newline-delimited JSON, one request line in, one response
/// line out. A `watch` request flips the connection into streaming mode until
/// the client hangs up.
pub async fn process_connection(socket: TcpStream, scheduler: Arc<Scheduler>) -> WireResult {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let resp = Response::Error {
                    code: "malformed_request".into(),
                    message: e.to_string(),
                };
                framed.send(serde_json::to_string(&resp)?).await?;
                continue;
            }
        };

        if let Request::Watch { date } = request {
            let mut rx = scheduler.subscribe(date);
            framed
                .send(serde_json::to_string(&Response::Watching { date })?)
                .await?;
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            framed
                                .send(serde_json::to_string(&Response::Event { event })?)
                                .await?;
                        }
                        // A slow watcher that missed events just keeps going.
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    },
                    incoming = framed.next() => match incoming {
                        Some(Ok(_)) => continue, // watchers only listen
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    },
                }
            }
        }

        let label = request.label();
        let started = Instant::now();
        let response = dispatch(&scheduler, request).await;
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "request" => label)
            .record(started.elapsed().as_secs_f64());
        framed.send(serde_json::to_string(&response)?).await?;
    }

    Ok(())
}

async fn dispatch(scheduler: &Scheduler, request: Request) -> Response {
    match request {
        Request::CreateReservation {
            student_id,
            teacher_id,
            date,
            start_time,
            duration_minutes,
            location,
            notes,
        } => {
            let cmd = NewReservation {
                student_id,
                teacher_id,
                date,
                start_time,
                duration_minutes,
                location,
                notes,
            };
            match scheduler.create_reservation(cmd).await {
                Ok(reservation) => Response::Reservation { reservation },
                Err(e) => Response::error(&e),
            }
        }
        Request::ConfirmReservation { id } => match scheduler.confirm_reservation(id).await {
            Ok(reservation) => Response::Reservation { reservation },
            Err(e) => Response::error(&e),
        },
        Request::CancelReservation {
            id,
            cancel_request_time,
            is_force_majeure,
        } => {
            match scheduler
                .cancel_reservation(id, cancel_request_time, is_force_majeure)
                .await
            {
                Ok(event) => Response::Cancellation {
                    tier: event.tier,
                    fee_minutes: event.fee_minutes,
                    new_status: crate::model::ReservationStatus::Cancelled,
                    event,
                },
                Err(e) => Response::error(&e),
            }
        }
        Request::MarkAttended { id } => match scheduler.mark_attended(id).await {
            Ok(reservation) => Response::Reservation { reservation },
            Err(e) => Response::error(&e),
        },
        Request::MarkNoShow { id } => match scheduler.mark_no_show(id).await {
            Ok(reservation) => Response::Reservation { reservation },
            Err(e) => Response::error(&e),
        },
        Request::StaffReschedule {
            id,
            date,
            start_time,
        } => match scheduler.staff_reschedule(id, date, start_time).await {
            Ok(reservation) => Response::Reservation { reservation },
            Err(e) => Response::error(&e),
        },
        Request::PickSlot {
            date,
            teacher_id,
            duration_minutes,
            from_time,
        } => {
            match scheduler
                .pick_slot(date, teacher_id, duration_minutes, from_time)
                .await
            {
                Ok(start_time) => Response::Slot { start_time },
                Err(e) => Response::error(&e),
            }
        }
        Request::GetAvailability {
            date,
            teacher_id,
            duration_minutes,
            granularity_minutes,
        } => {
            match scheduler
                .availability(date, teacher_id, duration_minutes, granularity_minutes)
                .await
            {
                Ok(view) => Response::Availability {
                    booked: view.booked,
                    free: view.free,
                    slots: view.slots,
                },
                Err(e) => Response::error(&e),
            }
        }
        Request::GetCalendar {
            view_mode,
            anchor_date,
            teacher_id,
        } => match scheduler.calendar(view_mode, anchor_date, teacher_id).await {
            Ok(cells) => Response::Calendar { cells },
            Err(e) => Response::error(&e),
        },
        Request::CreateMemo {
            date,
            time,
            content,
            memo_type,
            is_public,
            author_id,
            reservation_id,
            teacher_id,
            staff_id,
        } => {
            let cmd = NewMemo {
                date,
                time,
                content,
                memo_type,
                is_public,
                author_id,
                reservation_id,
                teacher_id,
                staff_id,
            };
            match scheduler.create_memo(cmd).await {
                Ok(memo) => Response::Memo { memo },
                Err(e) => Response::error(&e),
            }
        }
        Request::UpdateMemo {
            id,
            content,
            time,
            memo_type,
            is_public,
        } => {
            let patch = MemoPatch {
                content,
                time,
                memo_type,
                is_public,
            };
            match scheduler.update_memo(id, patch).await {
                Ok(memo) => Response::Memo { memo },
                Err(e) => Response::error(&e),
            }
        }
        Request::SetDurationPolicy { entries } => {
            match scheduler.set_duration_policy(entries).await {
                Ok(entries) => Response::PolicyUpdated { entries },
                Err(e) => Response::error(&e),
            }
        }
        // Handled by the connection loop before dispatch.
        Request::Watch { .. } => Response::Error {
            code: "invalid_request".into(),
            message: "watch is a connection mode, not a call".into(),
        },
    }
}
