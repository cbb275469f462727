use chrono::Utc;

use crate::admin;
use crate::cli::AdminCommand;
use crate::models::{Ack, OdometerCorrection};

use super::Context;

fn print_ack(ack: &Ack, fallback: &str) {
    println!("{}", ack.message.as_deref().unwrap_or(fallback));
}

pub async fn run(ctx: &Context, cmd: AdminCommand) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;

    match cmd {
        AdminCommand::Users => {
            for u in admin::list_users(&api, &session).await? {
                println!(
                    "{:<16} {:<30}{}{}",
                    u.login,
                    u.name,
                    if u.is_admin { " [admin]" } else { "" },
                    if u.active { "" } else { " (inativo)" }
                );
            }
        }
        AdminCommand::AddUser {
            login,
            name,
            password,
            admin: is_admin,
        } => {
            let user =
                admin::create_user(&api, &session, &login, &name, &password, is_admin).await?;
            println!("Usuário {} criado", user.login);
        }
        AdminCommand::DelUser { login } => {
            let ack = admin::delete_user(&api, &session, &login).await?;
            print_ack(&ack, "Usuário removido");
        }
        AdminCommand::Password { login, password } => {
            let ack = admin::change_password(&api, &session, &login, &password).await?;
            print_ack(&ack, "Senha atualizada");
        }
        AdminCommand::SetAdmin { login, off } => {
            let ack = admin::set_admin(&api, &session, &login, !off).await?;
            print_ack(&ack, "Permissão atualizada");
        }
        AdminCommand::Vehicles => {
            for v in admin::list_vehicles(&api, &session).await? {
                println!(
                    "{:>4}  {}{}",
                    v.id,
                    v.label(),
                    if v.active { "" } else { " (inativo)" }
                );
            }
        }
        AdminCommand::AddVehicle {
            plate,
            make,
            model,
            year,
        } => {
            let v = admin::create_vehicle(&api, &session, &plate, &make, &model, year).await?;
            println!("Veículo {} cadastrado (id {})", v.plate, v.id);
        }
        AdminCommand::DelVehicle { vehicle_id } => {
            let ack = admin::delete_vehicle(&api, &session, vehicle_id).await?;
            print_ack(&ack, "Veículo removido");
        }
        AdminCommand::EditKm {
            checkout_id,
            day,
            km_retirada,
            km_devolucao,
        } => {
            let correction = OdometerCorrection {
                km_retirada,
                km_devolucao,
            };
            let today = Utc::now().date_naive();
            let ack =
                admin::correct_odometer(&api, &session, checkout_id, &day, &correction, today)
                    .await?;
            print_ack(&ack, "Quilometragem atualizada");
        }
    }
    Ok(())
}
